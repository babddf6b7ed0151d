use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::{DEFAULT_FILE_EXTENSION, MAX_READ_TIMEOUT_SECONDS};
use super::error::ConfigError;
use super::monitor::MonitorSpec;

/// Structure representing the recorder configuration.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address of the frame sender, `tcp://host:port`
    pub address: String,
    /// Top level data directory; day sized subdirectories are made inside it
    pub data_dir: PathBuf,
    /// Stream id used for paths when frames don't carry one
    pub stream_id: String,
    /// Seconds of data per file before rotating
    pub time_per_file: f64,
    /// Seconds without data before the acquisition is considered over
    pub gap_size: f64,
    /// Seconds to wait on each read from the sender
    pub read_timeout: f64,
    pub monitored_channels: Vec<String>,
    /// Downsampled rate of the monitored channels, in Hz
    pub target_rate: f64,
    pub file_extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::from("tcp://localhost:4536"),
            data_dir: PathBuf::from("/data/"),
            stream_id: String::from("unknown"),
            time_per_file: 600.0,
            gap_size: 10.0,
            read_timeout: 5.0,
            monitored_channels: vec![],
            target_rate: 10.0,
            file_extension: String::from(DEFAULT_FILE_EXTENSION),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        std::fs::write(config_path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Check the numeric settings make sense
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.time_per_file > 0.0) {
            return Err(ConfigError::BadValue(
                "time_per_file",
                self.time_per_file.to_string(),
            ));
        }
        if !(self.gap_size > 0.0) {
            return Err(ConfigError::BadValue("gap_size", self.gap_size.to_string()));
        }
        if !(self.read_timeout > 0.0 && self.read_timeout <= MAX_READ_TIMEOUT_SECONDS) {
            return Err(ConfigError::BadValue(
                "read_timeout",
                self.read_timeout.to_string(),
            ));
        }
        if !(self.target_rate > 0.0 && self.target_rate.is_finite()) {
            return Err(ConfigError::BadValue(
                "target_rate",
                self.target_rate.to_string(),
            ));
        }
        if self.stream_id.is_empty() {
            return Err(ConfigError::BadValue("stream_id", String::from("(empty)")));
        }
        Ok(())
    }

    /// Read timeout, capped at an hour
    pub fn get_read_timeout(&self) -> Duration {
        let max = Duration::from_secs_f64(MAX_READ_TIMEOUT_SECONDS);
        Duration::try_from_secs_f64(self.read_timeout)
            .map_or(max, |timeout| timeout.min(max))
    }

    /// The host:port part of the address
    pub fn get_socket_address(&self) -> &str {
        self.address
            .strip_prefix("tcp://")
            .unwrap_or(&self.address)
    }

    pub fn monitor_spec(&self) -> MonitorSpec {
        MonitorSpec::new(self.monitored_channels.clone(), self.target_rate)
    }
}
