use std::path::PathBuf;

use super::monitor::{MonitorSpec, StreamBlock};

/// Report sent from the recording process after every recorder iteration
#[derive(Debug, Clone, Default)]
pub struct RecorderStatus {
    pub current_file: Option<PathBuf>,
    pub frames_written: u64,
    pub files_written: u64,
    pub connected: bool,
    pub stream_data: Vec<StreamBlock>,
}

impl RecorderStatus {
    pub fn new(
        current_file: Option<PathBuf>,
        frames_written: u64,
        files_written: u64,
        connected: bool,
        stream_data: Vec<StreamBlock>,
    ) -> Self {
        Self {
            current_file,
            frames_written,
            files_written,
            connected,
            stream_data,
        }
    }
}

/// Operator commands accepted by the recording process
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderCommand {
    /// Change the monitored channels; an empty list stops monitoring
    SetMonitor(MonitorSpec),
    Stop,
}
