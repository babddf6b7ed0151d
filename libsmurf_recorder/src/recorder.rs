use std::fmt::Debug;
use std::path::Path;

use super::clock::{Clock, SystemClock};
use super::config::Config;
use super::error::RecorderError;
use super::file_manager::FileManager;
use super::flow_control::process_flow_control;
use super::frame::Frame;
use super::frame_source::{Connector, FrameSource, ReadOutcome, TcpConnector};
use super::monitor::{ChannelMonitor, MonitorSpec, StreamBlock};

/// FrameRecorder ties the frame source, the file manager and the channel monitor together.
///
/// Each call to `run` is one iteration: read, act on flow control, check for a gap in the
/// data, feed the monitor, then write. The recorder is meant to be driven by a single
/// thread in a loop.
pub struct FrameRecorder<C: Connector, K: Clock = SystemClock> {
    source: FrameSource<C>,
    files: FileManager<K>,
    monitor: ChannelMonitor,
    gap_size: f64,
    frames: Vec<Frame>,
    stream_data: Vec<StreamBlock>,
}

impl<C, K> Debug for FrameRecorder<C, K>
where
    C: Connector + Debug,
    C::Connection: Debug,
    K: Clock + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRecorder")
            .field("source", &self.source)
            .field("files", &self.files)
            .field("monitor", &self.monitor)
            .field("gap_size", &self.gap_size)
            .field("frames", &self.frames.len())
            .field("stream_data", &self.stream_data.len())
            .finish()
    }
}

impl FrameRecorder<TcpConnector, SystemClock> {
    /// Recorder reading from the configured TCP address on the system clock
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, TcpConnector::new(&config.address), SystemClock)
    }
}

impl<C: Connector, K: Clock> FrameRecorder<C, K> {
    pub fn new(config: &Config, connector: C, clock: K) -> Self {
        Self {
            source: FrameSource::new(connector, config.get_read_timeout()),
            files: FileManager::new(config, clock),
            monitor: ChannelMonitor::new(config.monitor_spec()),
            gap_size: config.gap_size,
            frames: Vec::new(),
            stream_data: Vec::new(),
        }
    }

    /// Run one iteration of the recorder
    pub fn run(&mut self) -> Result<(), RecorderError> {
        let frames = match self.source.read() {
            ReadOutcome::Frames(frames) => frames,
            ReadOutcome::Unavailable => Vec::new(),
            ReadOutcome::Lost => {
                self.files.close_file()?;
                Vec::new()
            }
        };

        let data = process_flow_control(frames, &mut self.files)?;

        // Sources can vanish without an END frame
        self.files.check_for_frame_gap(self.gap_size)?;

        if self.monitor.is_active() {
            if let Err(e) = self.monitor.extract(&data) {
                spdlog::warn!("Failed to extract monitored channels: {e}");
            }
            self.stream_data.extend(self.monitor.drain());
        }

        // Anything left from a failed write goes first
        self.frames.extend(data);
        if !self.frames.is_empty() {
            self.files.create_new_file(&self.frames)?;
            self.files.write_frames_to_file(&mut self.frames)?;
            self.files.split_acquisition()?;
        }
        Ok(())
    }

    /// Take the monitored channel blocks gathered since the last call
    pub fn take_stream_data(&mut self) -> Vec<StreamBlock> {
        std::mem::take(&mut self.stream_data)
    }

    pub fn set_monitor(&mut self, spec: MonitorSpec) {
        if spec.is_empty() {
            spdlog::info!("No longer monitoring any channels");
        } else {
            spdlog::info!(
                "Monitoring channels {:?} at {} Hz",
                spec.channels,
                spec.target_rate
            );
        }
        self.monitor.set_spec(spec);
    }

    pub fn monitor_spec(&self) -> &MonitorSpec {
        self.monitor.spec()
    }

    /// Close any open file and drop the connection
    pub fn close(&mut self) -> Result<(), RecorderError> {
        self.files.close_file()?;
        self.source.drop_connection();
        Ok(())
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.files.current_file()
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_connected()
    }

    pub fn frames_written(&self) -> u64 {
        self.files.frames_written()
    }

    pub fn files_written(&self) -> u64 {
        self.files.files_written()
    }

    pub fn file_manager(&self) -> &FileManager<K> {
        &self.files
    }
}
