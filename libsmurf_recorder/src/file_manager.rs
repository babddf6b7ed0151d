use std::path::{Path, PathBuf};

use super::clock::{whole_seconds, Clock, SystemClock};
use super::config::Config;
use super::constants::DAY_BUCKET_DIGITS;
use super::error::FileManagerError;
use super::frame::{FlowControl, Frame, FrameType};
use super::frame_file::FrameWriter;

/// Build the directory for an acquisition: `data_dir/<first 5 digits of start>/<stream id>`.
///
/// The directory is created if it does not exist. Files within roughly the same day share
/// the first five digits of their timestamp and so land together.
pub fn create_dirname(
    start_time: i64,
    data_dir: &Path,
    stream_id: &str,
) -> Result<PathBuf, std::io::Error> {
    let stamp = start_time.to_string();
    let bucket: String = stamp.chars().take(DAY_BUCKET_DIGITS).collect();
    let sub_dir = data_dir.join(bucket).join(stream_id);
    if !sub_dir.exists() {
        std::fs::create_dir_all(&sub_dir)?;
    }
    Ok(sub_dir)
}

/// Full path of an output file: `dirname/<basename>_<suffix:03>.<extension>`
pub fn create_file_path(dirname: &Path, basename: i64, suffix: u32, extension: &str) -> PathBuf {
    dirname.join(format!("{basename}_{suffix:03}.{extension}"))
}

/// The file currently being written, with the time it was opened
#[derive(Debug)]
pub struct OpenFile {
    writer: FrameWriter,
    start_time: f64,
}

#[derive(Debug, Default)]
pub enum WriterState {
    #[default]
    Closed,
    Open(OpenFile),
}

/// FileManager decides where frames go on disk and when files open, rotate and close.
///
/// An acquisition is one continuous recording. It may span many files, which share a
/// directory and basename and are told apart by an increasing suffix. Rotation
/// (`split_acquisition`) keeps the suffix counting; closing (`close_file`) ends the
/// acquisition and resets it.
///
/// The most recent Observation frame is cached and written at the head of every new
/// file, so each file describes itself.
#[derive(Debug)]
pub struct FileManager<K: Clock = SystemClock> {
    clock: K,
    data_dir: PathBuf,
    default_stream_id: String,
    extension: String,
    time_per_file: f64,

    state: WriterState,
    last_meta: Option<Frame>,
    dirname: Option<PathBuf>,
    basename: Option<i64>,
    filename_suffix: u32,
    last_frame_write_time: Option<f64>,
    last_file_timestamp: Option<i64>,
    last_file_suffix: u32,
    files_written: u64,
    frames_written: u64,
}

impl<K: Clock> FileManager<K> {
    pub fn new(config: &Config, clock: K) -> Self {
        Self {
            clock,
            data_dir: config.data_dir.clone(),
            default_stream_id: config.stream_id.clone(),
            extension: config.file_extension.clone(),
            time_per_file: config.time_per_file,
            state: WriterState::Closed,
            last_meta: None,
            dirname: None,
            basename: None,
            filename_suffix: 0,
            last_frame_write_time: None,
            last_file_timestamp: None,
            last_file_suffix: 0,
            files_written: 0,
            frames_written: 0,
        }
    }

    /// Open a new file, if one is not already open.
    ///
    /// Only a fresh acquisition (suffix 0) picks a new directory and basename; the stream
    /// id is taken from the first frame in the batch which has one. Returns the path of the
    /// new file, or None if a file was already open.
    pub fn create_new_file(&mut self, frames: &[Frame]) -> Result<Option<PathBuf>, FileManagerError> {
        if self.is_open() {
            return Ok(None);
        }

        let start_time = self.clock.now();
        let start_stamp = whole_seconds(start_time);

        // Avoid duplicate file names if the last file started within the same second.
        // Closing resets the suffix, so count on from the last file opened.
        if self.last_file_timestamp == Some(start_stamp) {
            spdlog::debug!(
                "New file started within 1 second of previous file, incrementing filename suffix."
            );
            self.filename_suffix = self.filename_suffix.max(self.last_file_suffix + 1);
        }

        // Only pick a new dir and basename once an acquisition has finished
        if self.filename_suffix == 0 || self.dirname.is_none() || self.basename.is_none() {
            let stream_id = frames
                .iter()
                .find_map(|f| f.stream_id())
                .unwrap_or(self.default_stream_id.as_str());
            self.dirname = Some(create_dirname(start_stamp, &self.data_dir, stream_id)?);
            self.basename = Some(start_stamp);
        }

        let (dirname, basename) = match (&self.dirname, self.basename) {
            (Some(d), Some(b)) => (d, b),
            _ => return Err(FileManagerError::NoAcquisition(self.filename_suffix)),
        };
        let mut path = create_file_path(dirname, basename, self.filename_suffix, &self.extension);
        while path.exists() {
            spdlog::warn!(
                "File {} already exists, incrementing filename suffix.",
                path.to_string_lossy()
            );
            self.filename_suffix += 1;
            path = create_file_path(dirname, basename, self.filename_suffix, &self.extension);
        }
        spdlog::info!("Writing to file {}", path.to_string_lossy());

        let mut writer = FrameWriter::new(&path)?;
        self.last_file_timestamp = Some(start_stamp);
        self.last_file_suffix = self.filename_suffix;

        // Write the last metadata frame to the start of the new file
        if let Some(meta) = &self.last_meta {
            writer.write(meta)?;
            writer.flush()?;
        }

        self.state = WriterState::Open(OpenFile { writer, start_time });
        self.files_written += 1;
        Ok(Some(path))
    }

    /// Write a batch of data frames to the open file.
    ///
    /// Frames are removed from the batch as they are consumed. If writing fails the
    /// remaining frames are left in the batch and the error is returned. Returns the number
    /// of frames written.
    pub fn write_frames_to_file(&mut self, frames: &mut Vec<Frame>) -> Result<usize, FileManagerError> {
        let open = match &mut self.state {
            WriterState::Open(open) => open,
            WriterState::Closed => {
                spdlog::warn!(
                    "Asked to write {} frames with no file open; keeping them",
                    frames.len()
                );
                return Ok(0);
            }
        };

        let mut consumed = 0;
        let mut written = 0;
        let mut result = Ok(());
        for frame in frames.iter() {
            // Make sure we never record flow control frames
            if frame.is_flow_control() {
                spdlog::warn!(
                    "Received flow control frame with value {}. Flow control frames should be discarded earlier than this",
                    frame
                        .flow_control()
                        .map(|f| f.to_string())
                        .unwrap_or_else(|| String::from("unknown"))
                );
                consumed += 1;
                continue;
            }

            if let Err(e) = open.writer.write(frame).and_then(|_| open.writer.flush()) {
                result = Err(FileManagerError::FileError(e));
                break;
            }

            // Keep the most recent meta data frame
            if frame.frame_type() == FrameType::Observation {
                self.last_meta = Some(frame.clone());
            }
            self.last_frame_write_time = Some(self.clock.now());
            consumed += 1;
            written += 1;
        }

        frames.drain(..consumed);
        self.frames_written += written as u64;
        result.map(|_| written)
    }

    /// Rotate to a new file within the same acquisition once the file has been open
    /// longer than the configured time per file.
    ///
    /// Returns the path of the closed file, if one was closed.
    pub fn split_acquisition(&mut self) -> Result<Option<PathBuf>, FileManagerError> {
        let start_time = match &self.state {
            WriterState::Open(open) => open.start_time,
            WriterState::Closed => return Ok(None),
        };

        let t_diff = self.clock.now() - start_time;
        if t_diff > self.time_per_file {
            spdlog::debug!(
                "{:.1} seconds elapsed since start of file, splitting acquisition",
                t_diff
            );
            let closed = self.finish_file()?;
            self.filename_suffix += 1;
            return Ok(closed);
        }
        Ok(None)
    }

    /// Close the open file (if any) and end the acquisition.
    ///
    /// The suffix is always reset, so the next file starts a new acquisition.
    pub fn close_file(&mut self) -> Result<Option<PathBuf>, FileManagerError> {
        let closed = self.finish_file();
        self.filename_suffix = 0;
        closed
    }

    /// Close the file if nothing has been written for longer than gap_size seconds.
    ///
    /// Upstream sources can stop without sending END; a long silence is taken to mean the
    /// acquisition is over.
    pub fn check_for_frame_gap(&mut self, gap_size: f64) -> Result<(), FileManagerError> {
        if !self.is_open() {
            spdlog::trace!("Writer not active, not checking frame gap.");
            return Ok(());
        }

        if let Some(last_write) = self.last_frame_write_time {
            let t_diff = self.clock.now() - last_write;
            if t_diff > gap_size {
                spdlog::debug!(
                    "Last frame written {:.1} seconds ago, more than {} seconds, rotating file",
                    t_diff,
                    gap_size
                );
                self.close_file()?;
            }
        }
        Ok(())
    }

    /// Apply the file action for a flow control tag
    pub fn handle_flow_control(&mut self, flow: FlowControl) -> Result<(), FileManagerError> {
        match flow {
            FlowControl::Start => {
                spdlog::debug!("Saw START frame, closing any open file.");
                self.close_file()?;
            }
            FlowControl::End => {
                spdlog::debug!("Saw END frame, closing file and dropping metadata.");
                self.close_file()?;
                self.clear_last_meta();
            }
            FlowControl::Cleanse => spdlog::debug!("I saw a CLEANSE frame."),
            FlowControl::Alive => (),
        }
        Ok(())
    }

    pub fn clear_last_meta(&mut self) {
        self.last_meta = None;
    }

    pub fn last_meta(&self) -> Option<&Frame> {
        self.last_meta.as_ref()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, WriterState::Open(_))
    }

    pub fn current_file(&self) -> Option<&Path> {
        match &self.state {
            WriterState::Open(open) => Some(open.writer.path()),
            WriterState::Closed => None,
        }
    }

    pub fn start_time(&self) -> Option<f64> {
        match &self.state {
            WriterState::Open(open) => Some(open.start_time),
            WriterState::Closed => None,
        }
    }

    pub fn filename_suffix(&self) -> u32 {
        self.filename_suffix
    }

    pub fn dirname(&self) -> Option<&Path> {
        self.dirname.as_deref()
    }

    pub fn basename(&self) -> Option<i64> {
        self.basename
    }

    pub fn last_frame_write_time(&self) -> Option<f64> {
        self.last_frame_write_time
    }

    pub fn files_written(&self) -> u64 {
        self.files_written
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Write the end marker and drop the writer, leaving the state Closed
    fn finish_file(&mut self) -> Result<Option<PathBuf>, FileManagerError> {
        match std::mem::take(&mut self.state) {
            WriterState::Open(open) => {
                let n_frames = open.writer.frames_written();
                let (path, size) = open.writer.end_processing()?;
                spdlog::info!(
                    "Closed file {} ({} frames, {})",
                    path.to_string_lossy(),
                    n_frames,
                    human_bytes::human_bytes(size as f64)
                );
                Ok(Some(path))
            }
            WriterState::Closed => Ok(None),
        }
    }
}

impl<K: Clock> Drop for FileManager<K> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close_file() {
                spdlog::error!("Failed to close file on shutdown: {e}");
            }
        }
    }
}
