use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// Source of wall-clock time, in seconds since the Unix epoch
pub trait Clock {
    fn now(&self) -> f64;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1.0e9
    }
}

/// A clock which only moves when told to. Clones share the same time, so one copy
/// can be handed to a recorder while another drives it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, time: f64) {
        if let Ok(mut t) = self.time.lock() {
            *t = time;
        }
    }

    pub fn advance(&self, seconds: f64) {
        if let Ok(mut t) = self.time.lock() {
            *t += seconds;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        match self.time.lock() {
            Ok(t) => *t,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Integer seconds of a timestamp, as used for file names
pub fn whole_seconds(time: f64) -> i64 {
    time.floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100.0);
        let handle = clock.clone();
        handle.advance(2.5);
        assert_eq!(clock.now(), 102.5);
        handle.set(7.0);
        assert_eq!(clock.now(), 7.0);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now() > 1_577_836_800.0);
    }

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(1_700_000_000.999), 1_700_000_000);
    }
}
