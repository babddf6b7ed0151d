//! # smurf_recorder_cli
//!
//! Part of the smurf_recorder crate family.
//!
//! Command line tools for recording SMuRF frame streams.
//!
//! ## Use
//!
//! ```bash
//! smurf_recorder_cli new -p config.yml
//! smurf_recorder_cli record -p config.yml
//! smurf_recorder_cli simulate --port 4536 --channels 16 --sample-rate 200 --frame-rate 1
//! smurf_recorder_cli dump /data/15700/crate1slot2/1570000000_000.g3
//! ```
//!
//! While recording, commands can be typed on stdin:
//!
//! - `monitor <channel,...> [rate]`: downsample the channels (names like `r0012`, or plain
//! channel numbers) to `rate` Hz, which defaults to the config `target_rate`
//! - `unmonitor`: stop monitoring
//! - `quit`: close the current file and exit
//!
//! Ctrl-C (or SIGTERM) also closes the current file before exiting.
//!
//! Library output is logged to `smurf_recorder.log` in the working directory.
use clap::{value_parser, Arg, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use libsmurf_recorder::config::Config;
use libsmurf_recorder::error::ConfigError;
use libsmurf_recorder::frame::Frame;
use libsmurf_recorder::frame_file::FrameFile;
use libsmurf_recorder::monitor::{readout_channel_name, MonitorSpec};
use libsmurf_recorder::network_sender::NetworkSender;
use libsmurf_recorder::process::record;
use libsmurf_recorder::simulator::StreamSimulator;
use libsmurf_recorder::status::{RecorderCommand, RecorderStatus};

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    Config::default().write_config_file(path)
}

/// Send library logging to a file
fn setup_file_logger(path: &Path) -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(path))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

/// Parse an operator command typed while recording
fn parse_command(line: &str, default_rate: f64) -> Result<Option<RecorderCommand>, String> {
    let mut words = line.split_whitespace();
    match words.next() {
        None => Ok(None),
        Some("quit") | Some("exit") => Ok(Some(RecorderCommand::Stop)),
        Some("unmonitor") => Ok(Some(RecorderCommand::SetMonitor(MonitorSpec::default()))),
        Some("monitor") => {
            let channels: Vec<String> = words
                .next()
                .ok_or_else(|| String::from("monitor needs a list of channels"))?
                .split(',')
                .filter(|c| !c.is_empty())
                .map(|c| match c.parse::<u32>() {
                    Ok(n) => readout_channel_name(n),
                    Err(_) => String::from(c),
                })
                .collect();
            let rate = match words.next() {
                Some(r) => r
                    .parse::<f64>()
                    .map_err(|_| format!("{r} is not a valid rate"))?,
                None => default_rate,
            };
            if !(rate > 0.0 && rate.is_finite()) {
                return Err(format!("{rate} is not a valid rate"));
            }
            Ok(Some(RecorderCommand::SetMonitor(MonitorSpec::new(
                channels, rate,
            ))))
        }
        Some(other) => Err(format!("Unknown command {other}")),
    }
}

/// Read commands from stdin and forward them to the recorder
fn spawn_command_reader(tx: Sender<RecorderCommand>, default_rate: f64) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    log::error!("Failed to read command: {e}");
                    return;
                }
            };
            match parse_command(&line, default_rate) {
                Ok(Some(command)) => {
                    let stop = command == RecorderCommand::Stop;
                    if tx.send(command).is_err() || stop {
                        return;
                    }
                }
                Ok(None) => (),
                Err(e) => log::warn!("{e}"),
            }
        }
    });
}

/// Ask the recorder to close its file and stop
fn request_stop(tx: &Sender<RecorderCommand>) {
    log::warn!("Interrupted, closing the current file...");
    if tx.send(RecorderCommand::Stop).is_err() {
        log::warn!("Recorder has already stopped");
    }
}

fn status_message(status: &RecorderStatus) -> String {
    let file = match &status.current_file {
        Some(path) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        None => String::from("no file open"),
    };
    let mut message = format!(
        "{} | {} | frames: {} | files: {}",
        if status.connected {
            "connected"
        } else {
            "waiting for sender"
        },
        file,
        status.frames_written,
        status.files_written
    );
    for block in status.stream_data.iter() {
        if let Some(last) = block.data.get(&block.block_name).and_then(|d| d.last()) {
            message.push_str(&format!(" | {}: {:.4}", block.block_name, last));
        }
    }
    message
}

fn run_record(config_path: &Path, pb_manager: &MultiProgress) {
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Sender Address: {}", config.get_socket_address());
    log::info!("Data Path: {}", config.data_dir.to_string_lossy());
    log::info!("Stream ID: {}", config.stream_id);
    log::info!(
        "Time Per File: {} s Gap Size: {} s",
        config.time_per_file,
        config.gap_size
    );
    if !config.monitored_channels.is_empty() {
        log::info!(
            "Monitoring: {:?} at {} Hz",
            config.monitored_channels,
            config.target_rate
        );
    }

    let (status_tx, status_rx) = mpsc::channel::<RecorderStatus>();
    let (command_tx, command_rx) = mpsc::channel::<RecorderCommand>();
    spawn_command_reader(command_tx.clone(), config.target_rate);
    let signal_tx = command_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || request_stop(&signal_tx)) {
        log::error!("Could not install the Ctrl-C handler: {e}");
    }

    let pb = pb_manager.add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(200));

    // Spawn the task!
    let handle = std::thread::spawn(move || record(&config, &status_tx, &command_rx));

    loop {
        match status_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(status) => pb.set_message(status_message(&status)),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(Duration::from_millis(50)),
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(result) => match result {
                    Ok(_) => log::info!("Recorder stopped cleanly."),
                    Err(e) => log::error!("Recording failed with error: {e}"),
                },
                Err(_) => log::error!("Failed to join recording task!"),
            }
            break;
        }
    }
    drop(command_tx);

    pb.finish();
}

fn run_simulate(matches: &ArgMatches) {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(4536);
    let n_channels = matches.get_one::<usize>("channels").copied().unwrap_or(16);
    let sample_rate = matches.get_one::<f64>("sample-rate").copied().unwrap_or(200.0);
    let frame_rate = matches.get_one::<f64>("frame-rate").copied().unwrap_or(1.0);
    let n_frames = matches
        .get_one::<u64>("frames")
        .copied()
        .filter(|n| *n > 0);
    let stream_id = matches
        .get_one::<String>("stream-id")
        .cloned()
        .unwrap_or_else(|| String::from("stream_sim"));

    let sender = match NetworkSender::bind(("0.0.0.0", port)) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Could not listen on port {port}: {e}");
            return;
        }
    };
    log::info!(
        "Simulating {n_channels} channels at {sample_rate} Hz on port {port} as {stream_id}"
    );
    let mut simulator = StreamSimulator::new(sender, n_channels, sample_rate, &stream_id);

    // Keepalives only until someone is listening
    log::info!("Waiting for a reader...");
    while simulator.sender().n_clients() == 0 {
        if let Err(e) = simulator.send_keepalive() {
            log::error!("{e}");
            return;
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    match simulator.stream(frame_rate, n_frames) {
        Ok(()) => log::info!("Sent {} frames.", simulator.frame_num()),
        Err(e) => log::error!("Simulation failed with error: {e}"),
    }
    simulator.close();
}

fn describe_frame(frame: &Frame) -> String {
    let mut description = format!("{}", frame.frame_type());
    if let Some(fields) = frame.fields() {
        for (key, value) in fields.iter() {
            description.push_str(&format!("\n    {key}: {value}"));
        }
    }
    if let Some(block) = frame.timestreams() {
        description.push_str(&format!(
            "\n    data: {} channels x {} samples",
            block.n_channels(),
            block.n_samples()
        ));
        if let Some(rate) = block.sample_rate() {
            description.push_str(&format!(" at {rate:.2} Hz"));
        }
    }
    description
}

fn run_dump(path: &Path) {
    let mut file = match FrameFile::new(path) {
        Ok(f) => f,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let mut count = 0;
    loop {
        match file.get_next_frame() {
            Ok(Some(frame)) => {
                println!("Frame {count}: {}", describe_frame(&frame));
                count += 1;
            }
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read frame {count}: {e}");
                break;
            }
        }
    }
    log::info!("Read {count} frames from {}", path.to_string_lossy());
}

fn path_arg() -> Arg {
    Arg::new("path")
        .short('p')
        .long("path")
        .required(true)
        .help("Path to the config file")
}

fn main() {
    // Create a cli
    let matches = Command::new("smurf_recorder_cli")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("new")
                .about("Make a template configuration yaml file")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("record")
                .about("Record a frame stream using a configuration yaml file")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("simulate")
                .about("Serve a simulated frame stream")
                .arg(
                    Arg::new("port")
                        .long("port")
                        .value_parser(value_parser!(u16))
                        .default_value("4536"),
                )
                .arg(
                    Arg::new("channels")
                        .long("channels")
                        .value_parser(value_parser!(usize))
                        .default_value("16"),
                )
                .arg(
                    Arg::new("sample-rate")
                        .long("sample-rate")
                        .value_parser(value_parser!(f64))
                        .default_value("200"),
                )
                .arg(
                    Arg::new("frame-rate")
                        .long("frame-rate")
                        .value_parser(value_parser!(f64))
                        .default_value("1"),
                )
                .arg(
                    Arg::new("frames")
                        .long("frames")
                        .value_parser(value_parser!(u64))
                        .default_value("0")
                        .help("Number of scan frames to send; 0 streams forever"),
                )
                .arg(
                    Arg::new("stream-id")
                        .long("stream-id")
                        .default_value("stream_sim"),
                ),
        )
        .subcommand(
            Command::new("dump")
                .about("Print the frames in a file")
                .arg(Arg::new("file").required(true)),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }

    if let Err(e) = setup_file_logger(Path::new("./smurf_recorder.log")) {
        log::warn!("Could not create log file, library output will go to the terminal: {e}");
    }

    match matches.subcommand() {
        Some(("new", sub)) => {
            let Some(config_path) = sub.get_one::<String>("path").map(PathBuf::from) else {
                return;
            };
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );
            match make_template_config(&config_path) {
                Ok(()) => log::info!("Done."),
                Err(e) => log::error!("{e}"),
            }
        }
        Some(("record", sub)) => {
            let Some(config_path) = sub.get_one::<String>("path").map(PathBuf::from) else {
                return;
            };
            run_record(&config_path, &pb_manager);
            log::info!("Done.");
        }
        Some(("simulate", sub)) => run_simulate(sub),
        Some(("dump", sub)) => {
            if let Some(file) = sub.get_one::<String>("file") {
                run_dump(Path::new(file));
            }
        }
        _ => (),
    }
}
