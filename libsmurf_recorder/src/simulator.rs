use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::time::Duration;

use super::clock::{whole_seconds, Clock, SystemClock};
use super::constants::{FRAME_NUM_KEY, SESSION_ID_KEY, START_TIME_KEY, STREAM_ID_KEY};
use super::error::SimulatorError;
use super::frame::{FieldValue, FlowControl, Frame, FrameType, ScanFrame, TimestreamMap};
use super::monitor::readout_channel_name;
use super::network_sender::NetworkSender;

/// A simulated detector channel producing Gaussian noise
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamChannel {
    pub mean: f64,
    pub stdev: f64,
}

impl StreamChannel {
    pub fn new(mean: f64, stdev: f64) -> Self {
        Self { mean, stdev }
    }

    /// Draw one sample
    pub fn read<R: Rng>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mean + self.stdev * z
    }
}

/// Sample times from start (inclusive) to stop (exclusive) at the given rate
pub fn sample_times(start: f64, stop: f64, sample_rate: f64) -> Vec<f64> {
    if !(sample_rate > 0.0) || stop <= start {
        return Vec::new();
    }
    let n_samples = ((stop - start) * sample_rate).ceil() as usize;
    (0..n_samples)
        .map(|i| start + i as f64 / sample_rate)
        .filter(|t| *t < stop)
        .collect()
}

/// StreamSimulator stands in for a SMuRF, serving a frame stream over TCP.
///
/// The stream looks like the real thing: START followed by an Observation frame when
/// streaming begins, a keepalive before each scan, scan frames of Gaussian noise on
/// channels r0000, r0001, ..., and END plus CLEANSE when streaming stops.
#[derive(Debug)]
pub struct StreamSimulator<K: Clock = SystemClock> {
    sender: NetworkSender,
    clock: K,
    rng: StdRng,
    stream_id: String,
    channels: Vec<StreamChannel>,
    sample_rate: f64,
    session_id: i64,
    frame_num: i64,
    is_streaming: bool,
}

impl StreamSimulator<SystemClock> {
    pub fn new(sender: NetworkSender, n_channels: usize, sample_rate: f64, stream_id: &str) -> Self {
        Self::with_clock(sender, SystemClock, n_channels, sample_rate, stream_id)
    }
}

impl<K: Clock> StreamSimulator<K> {
    pub fn with_clock(
        sender: NetworkSender,
        clock: K,
        n_channels: usize,
        sample_rate: f64,
        stream_id: &str,
    ) -> Self {
        Self {
            sender,
            clock,
            rng: StdRng::from_entropy(),
            stream_id: String::from(stream_id),
            channels: vec![StreamChannel::new(0.0, 1.0); n_channels],
            sample_rate,
            session_id: 0,
            frame_num: 0,
            is_streaming: false,
        }
    }

    /// Use a fixed seed for reproducible data
    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn frame_num(&self) -> i64 {
        self.frame_num
    }

    pub fn sender(&mut self) -> &mut NetworkSender {
        &mut self.sender
    }

    /// Send START and a fresh Observation frame
    pub fn set_stream_on(&mut self) -> Result<(), SimulatorError> {
        spdlog::info!("Sending START flowcontrol frame");
        self.sender
            .send(&Frame::flow_control_frame(FlowControl::Start))?;

        let start_time = self.clock.now();
        self.session_id = whole_seconds(start_time);
        let mut obs = Frame::empty(FrameType::Observation);
        obs.insert(SESSION_ID_KEY, FieldValue::Int(self.session_id))
            .insert(START_TIME_KEY, FieldValue::Double(start_time))
            .insert(STREAM_ID_KEY, FieldValue::Str(self.stream_id.clone()));
        self.sender.send(&obs)?;

        self.is_streaming = true;
        Ok(())
    }

    /// Send END then CLEANSE
    pub fn set_stream_off(&mut self) -> Result<(), SimulatorError> {
        spdlog::info!("Sending END flowcontrol frame");
        self.sender
            .send(&Frame::flow_control_frame(FlowControl::End))?;
        self.sender
            .send(&Frame::flow_control_frame(FlowControl::Cleanse))?;
        self.is_streaming = false;
        Ok(())
    }

    pub fn send_keepalive(&mut self) -> Result<(), SimulatorError> {
        self.sender
            .send(&Frame::flow_control_frame(FlowControl::Alive))
    }

    /// Build a scan frame covering `start..stop` seconds
    pub fn make_scan_frame(&mut self, start: f64, stop: f64) -> Result<Frame, SimulatorError> {
        let times = sample_times(start, stop, self.sample_rate);
        let names: Vec<String> = (0..self.channels.len())
            .map(|i| readout_channel_name(i as u32))
            .collect();
        let channels = &self.channels;
        let rng = &mut self.rng;
        let samples = Array2::from_shape_fn((channels.len(), times.len()), |(c, _)| {
            channels[c].read(&mut *rng)
        });

        let mut frame = Frame::Scan(ScanFrame {
            fields: Default::default(),
            data: Some(TimestreamMap::new(names, times, samples)?),
        });
        frame
            .insert(SESSION_ID_KEY, FieldValue::Int(self.session_id))
            .insert(FRAME_NUM_KEY, FieldValue::Int(self.frame_num))
            .insert(STREAM_ID_KEY, FieldValue::Str(self.stream_id.clone()));
        Ok(frame)
    }

    pub fn send_scan(&mut self, start: f64, stop: f64) -> Result<(), SimulatorError> {
        let frame = self.make_scan_frame(start, stop)?;
        self.sender.send(&frame)?;
        spdlog::debug!("Sent scan frame {}", self.frame_num);
        self.frame_num += 1;
        Ok(())
    }

    /// Stream scan frames at `frame_rate` Hz, bracketed by START and END.
    ///
    /// With `n_frames` of None this only returns on error.
    pub fn stream(&mut self, frame_rate: f64, n_frames: Option<u64>) -> Result<(), SimulatorError> {
        if !(frame_rate > 0.0 && frame_rate.is_finite()) {
            return Err(SimulatorError::BadRate(frame_rate));
        }
        let period = Duration::from_secs_f64(1.0 / frame_rate);
        self.set_stream_on()?;
        let mut sent: u64 = 0;
        while n_frames.map_or(true, |n| sent < n) {
            self.send_keepalive()?;
            let frame_start = self.clock.now();
            std::thread::sleep(period);
            let frame_stop = self.clock.now();
            self.send_scan(frame_start, frame_stop)?;
            sent += 1;
        }
        self.set_stream_off()?;
        Ok(())
    }

    pub fn close(&mut self) {
        self.sender.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::read_frame;
    use std::net::TcpStream;

    fn make_simulator(n_channels: usize) -> StreamSimulator<ManualClock> {
        let sender = NetworkSender::bind("127.0.0.1:0").unwrap();
        let mut sim = StreamSimulator::with_clock(
            sender,
            ManualClock::new(1_570_000_000.0),
            n_channels,
            10.0,
            "stream_sim",
        );
        sim.seed(42);
        sim
    }

    #[test]
    fn test_sample_times() {
        assert_eq!(sample_times(0.0, 1.0, 4.0), vec![0.0, 0.25, 0.5, 0.75]);
        assert!(sample_times(1.0, 1.0, 10.0).is_empty());
        assert!(sample_times(0.0, 1.0, 0.0).is_empty());
    }

    #[test]
    fn test_channel_statistics() {
        let mut rng = StdRng::seed_from_u64(7);
        let channel = StreamChannel::new(5.0, 2.0);
        let n = 20_000;
        let values: Vec<f64> = (0..n).map(|_| channel.read(&mut rng)).collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 5.0).abs() < 0.1);
        assert!((var.sqrt() - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_make_scan_frame() {
        let mut sim = make_simulator(3);
        let frame = sim.make_scan_frame(100.0, 101.0).unwrap();
        assert_eq!(frame.frame_type(), FrameType::Scan);
        assert_eq!(frame.stream_id(), Some("stream_sim"));
        assert!(frame.get(FRAME_NUM_KEY).is_some());

        let block = frame.timestreams().unwrap();
        assert_eq!(block.names(), ["r0000", "r0001", "r0002"]);
        assert_eq!(block.n_samples(), 10);
        assert_eq!(block.times()[0], 100.0);
    }

    #[test]
    fn test_stream_order() {
        let mut sim = make_simulator(2);
        let port = sim.sender().local_port().unwrap();
        let mut reader = TcpStream::connect(("127.0.0.1", port)).unwrap();
        reader
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        for _ in 0..100 {
            sim.sender().accept_pending().unwrap();
            if sim.sender().n_clients() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        sim.set_stream_on().unwrap();
        assert!(sim.is_streaming());
        sim.send_keepalive().unwrap();
        sim.send_scan(1_570_000_000.0, 1_570_000_001.0).unwrap();
        sim.set_stream_off().unwrap();
        assert_eq!(sim.frame_num(), 1);

        let frames: Vec<Frame> = (0..6)
            .map(|_| read_frame(&mut reader).unwrap().unwrap())
            .collect();
        assert_eq!(frames[0].flow_control(), Some(FlowControl::Start));
        assert_eq!(frames[1].frame_type(), FrameType::Observation);
        assert_eq!(frames[1].session_id(), Some(1_570_000_000));
        assert_eq!(frames[2].flow_control(), Some(FlowControl::Alive));
        assert_eq!(frames[3].timestreams().unwrap().n_channels(), 2);
        assert_eq!(frames[4].flow_control(), Some(FlowControl::End));
        assert_eq!(frames[5].flow_control(), Some(FlowControl::Cleanse));
    }
}
