use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;
use super::status::RecorderStatus;

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("Failed to parse buffer into Frame: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Incorrect magic {0:#010x} found for Frame; expected {exp:#010x}", exp=FRAME_MAGIC)]
    BadMagic(u32),
    #[error("Unknown frame type code {0} found for Frame")]
    BadFrameType(u8),
    #[error("Frame payload size {0} exceeds maximum of {max}", max=MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(u32),
    #[error("Frame payload declared {0} bytes but field data used {1}")]
    PayloadSizeMismatch(u32, u64),
    #[error("Unknown field value tag {0} found in Frame")]
    BadValueTag(u8),
    #[error("Frame field name or string was not valid UTF-8")]
    BadString(#[from] std::string::FromUtf8Error),
    #[error("Invalid flow control value {0} found in Frame")]
    BadFlowControl(i64),
    #[error("Frame field {0} has the wrong value type")]
    BadFieldType(String),
    #[error("Timestream block is malformed: {0}")]
    BadTimestreams(#[from] TimestreamError),
}

#[derive(Debug, Error)]
pub enum FrameEncodeError {
    #[error("Failed to write Frame: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Frame field name {0} is too long to encode")]
    NameTooLong(String),
    #[error("Frame payload of {0} bytes exceeds maximum of {max}", max=MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Error)]
pub enum TimestreamError {
    #[error("Timestream block has {0} channel names but {1} data rows")]
    ChannelCountMismatch(usize, usize),
    #[error("Timestream block has {0} sample times but {1} data columns")]
    SampleCountMismatch(usize, usize),
    #[error("Timestream block has duplicate channel name {0}")]
    DuplicateChannel(String),
}

#[derive(Debug, Error)]
pub enum FrameFileError {
    #[error("Could not open FrameFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("FrameFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("FrameFile failed to decode a frame: {0}")]
    DecodeError(#[from] FrameDecodeError),
    #[error("FrameFile failed to encode a frame: {0}")]
    EncodeError(#[from] FrameEncodeError),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Frame source address {0} is not a valid tcp address")]
    BadAddress(String),
    #[error("Frame source failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Frame source received a malformed frame: {0}")]
    DecodeError(#[from] FrameDecodeError),
    #[error("Frame source connection was closed by the sender")]
    Closed,
}

#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("FileManager failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("FileManager failed due to FrameFile error: {0}")]
    FileError(#[from] FrameFileError),
    #[error("FileManager has no directory for suffix {0}; the acquisition was never started")]
    NoAcquisition(u32),
}

#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    #[error("Monitor target rate must be positive and finite, got {0}")]
    BadTargetRate(f64),
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Recorder failed due to FileManager error: {0}")]
    FileManagerError(#[from] FileManagerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has invalid value for {0}: {1}")]
    BadValue(&'static str, String),
}

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Simulator failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Simulator failed to encode a frame: {0}")]
    EncodeError(#[from] FrameEncodeError),
    #[error("Simulator failed to build a timestream block: {0}")]
    TimestreamError(#[from] TimestreamError),
    #[error("Simulator rate must be positive and finite, got {0}")]
    BadRate(f64),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Recorder error: {0}")]
    RecorderError(#[from] RecorderError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<RecorderStatus>),
}
