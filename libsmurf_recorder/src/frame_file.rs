use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::codec::{read_frame, write_frame};
use super::error::FrameFileError;
use super::frame::Frame;

/// Writes Frames to a file on disk.
///
/// Files are always terminated by an EndProcessing frame, written by `end_processing`.
#[derive(Debug)]
pub struct FrameWriter {
    path: PathBuf,
    file: BufWriter<File>,
    frames_written: u64,
}

impl FrameWriter {
    /// Create the writer and a new file at path. An existing file is never truncated.
    pub fn new(path: &Path) -> Result<Self, FrameFileError> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            frames_written: 0,
        })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), FrameFileError> {
        write_frame(&mut self.file, frame)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), FrameFileError> {
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames written so far, not counting the end marker
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Write the end marker, flush, and consume the writer
    ///
    /// Returns the path of the finished file and its size in bytes
    pub fn end_processing(mut self) -> Result<(PathBuf, u64), FrameFileError> {
        write_frame(&mut self.file, &Frame::EndProcessing)?;
        self.file.flush()?;
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        let size = file.metadata()?.len();
        Ok((self.path, size))
    }
}

/// Reads Frames back from a file written by a FrameWriter
#[derive(Debug)]
pub struct FrameFile {
    file: BufReader<File>,
    is_eof: bool,
}

impl FrameFile {
    pub fn new(path: &Path) -> Result<Self, FrameFileError> {
        if !path.exists() {
            return Err(FrameFileError::BadFilePath(path.to_path_buf()));
        }
        Ok(Self {
            file: BufReader::new(File::open(path)?),
            is_eof: false,
        })
    }

    /// Get the next frame in the file
    ///
    /// Returns a `Result<Option<Frame>>`. The Option is None at the end of the file.
    pub fn get_next_frame(&mut self) -> Result<Option<Frame>, FrameFileError> {
        if self.is_eof {
            return Ok(None);
        }
        match read_frame(&mut self.file)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.is_eof = true;
                Ok(None)
            }
        }
    }

    /// Read every remaining frame, end marker included
    pub fn read_all(&mut self) -> Result<Vec<Frame>, FrameFileError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.get_next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn is_eof(&self) -> bool {
        self.is_eof
    }
}
