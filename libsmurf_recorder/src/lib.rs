//! # smurf_recorder
//!
//! smurf_recorder is the frame recorder for the SMuRF readout, written in Rust. It listens
//! to the live frame stream sent by a SMuRF (or the bundled stream simulator), and writes
//! the frames to disk, deciding when output files open, rotate and close. A handful of
//! channels can be pulled out of the stream and downsampled for live monitoring.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI recorder use `cargo install --path ./smurf_recorder_cli`
//! from the top level repository. The binary is installed to your cargo install location
//! (typically something like `~/.cargo/bin/`). To use the CLI see the
//! `smurf_recorder_cli` README.
//!
//! ## Configuration
//!
//! The recorder is configured with a YAML file:
//!
//! ```yml
//! address: tcp://localhost:4536
//! data_dir: /data/
//! stream_id: unknown
//! time_per_file: 600.0
//! gap_size: 10.0
//! read_timeout: 5.0
//! monitored_channels: []
//! target_rate: 10.0
//! file_extension: g3
//! ```
//!
//! - `address`: where the frame sender is listening
//! - `data_dir`: top level output directory
//! - `stream_id`: used in the output path when the frames don't carry a `sostream_id`
//! - `time_per_file`: seconds of data per file before a new one is started
//! - `gap_size`: seconds without data before the acquisition is considered over
//! - `read_timeout`: seconds to wait for frames before the connection is dropped
//! - `monitored_channels`, `target_rate`: channels to downsample (e.g. `r0012`) and the
//! rate in Hz to downsample them to
//!
//! Missing fields take the defaults above.
//!
//! ## Output
//!
//! Files are grouped by acquisition. An acquisition starts with the first data after a
//! START frame (or after a gap, or a lost connection) and ends at an END frame. Each file
//! of an acquisition shares a directory and basename:
//!
//! ```text
//! data_dir
//! |---- 15700 (first 5 digits of the acquisition start time)
//! |    |---- crate1slot2 (stream id)
//! |    |    |---- 1570000000_000.g3
//! |    |    |---- 1570000000_001.g3
//! ```
//!
//! Every file begins with the most recent Observation frame of the acquisition (when
//! there is one), followed by the data frames, and ends with an EndProcessing frame.
//! Flow control frames (keepalives, START, END, CLEANSE) are never written.
//!
//! ### Frame Format
//!
//! Frames are little-endian records, on disk and over the network alike:
//!
//! ```text
//! magic(u32 = 0x47334652) type(u8) payload length(u32)
//! payload: n_fields(u32), then per field: name_len(u16) name tag(u8) value
//! ```
//!
//! Value tags are 0 bool, 1 int, 2 double, 3 string and 4 timestreams. A timestream block
//! is the channel count, sample count, channel names, sample times, then the samples of
//! each channel in turn.
pub mod clock;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod file_manager;
pub mod flow_control;
pub mod frame;
pub mod frame_file;
pub mod frame_source;
pub mod monitor;
pub mod network_sender;
pub mod process;
pub mod recorder;
pub mod simulator;
pub mod status;
