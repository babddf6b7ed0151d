use std::sync::mpsc::{Receiver, Sender, TryRecvError};

use super::clock::Clock;
use super::config::Config;
use super::error::ProcessorError;
use super::frame_source::Connector;
use super::recorder::FrameRecorder;
use super::status::{RecorderCommand, RecorderStatus};

/// Apply every waiting operator command. Returns false once the recorder should stop.
fn handle_commands<C: Connector, K: Clock>(
    recorder: &mut FrameRecorder<C, K>,
    commands: &Receiver<RecorderCommand>,
) -> bool {
    loop {
        match commands.try_recv() {
            Ok(RecorderCommand::SetMonitor(spec)) => recorder.set_monitor(spec),
            Ok(RecorderCommand::Stop) => {
                spdlog::info!("Received stop command");
                return false;
            }
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => {
                spdlog::warn!("Command channel closed, stopping recorder");
                return false;
            }
        }
    }
}

/// Drive a recorder until told to stop.
///
/// A status report is sent after every iteration. Whatever happens, the open file is
/// closed before returning.
pub fn run_recorder<C: Connector, K: Clock>(
    recorder: &mut FrameRecorder<C, K>,
    tx: &Sender<RecorderStatus>,
    commands: &Receiver<RecorderCommand>,
) -> Result<(), ProcessorError> {
    let mut result = Ok(());
    while handle_commands(recorder, commands) {
        if let Err(e) = recorder.run() {
            spdlog::error!("Recorder failed: {e}");
            result = Err(ProcessorError::RecorderError(e));
            break;
        }

        let status = RecorderStatus::new(
            recorder.current_file().map(|p| p.to_path_buf()),
            recorder.frames_written(),
            recorder.files_written(),
            recorder.is_connected(),
            recorder.take_stream_data(),
        );
        if let Err(e) = tx.send(status) {
            result = Err(ProcessorError::SendError(e));
            break;
        }
    }

    if let Err(e) = recorder.close() {
        spdlog::error!("Failed to close recorder: {e}");
        if result.is_ok() {
            result = Err(ProcessorError::RecorderError(e));
        }
    }
    spdlog::info!(
        "Recorder stopped after writing {} frames to {} files",
        recorder.frames_written(),
        recorder.files_written()
    );
    result
}

/// The main loop of smurf_recorder.
///
/// Records the stream at the configured address until a Stop command arrives (or the
/// command channel closes). Meant to be run on its own thread.
pub fn record(
    config: &Config,
    tx: &Sender<RecorderStatus>,
    commands: &Receiver<RecorderCommand>,
) -> Result<(), ProcessorError> {
    config.validate()?;
    spdlog::info!(
        "Recording from {} into {}",
        config.address,
        config.data_dir.to_string_lossy()
    );
    let mut recorder = FrameRecorder::from_config(config);
    run_recorder(&mut recorder, tx, commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::{Frame, FrameType};
    use crate::frame_source::testing::ScriptedConnector;
    use crate::monitor::MonitorSpec;
    use std::sync::mpsc;

    #[test]
    fn test_record_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            read_timeout: 0.01,
            ..Default::default()
        };
        let connector = ScriptedConnector::default();
        connector.push(vec![Frame::empty(FrameType::Scan)]);
        connector.push(vec![Frame::empty(FrameType::Scan)]);
        let mut recorder =
            FrameRecorder::new(&config, connector, ManualClock::new(1_570_000_000.0));

        let (status_tx, status_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();
        let spec = MonitorSpec::new(vec![String::from("r0000")], 5.0);
        command_tx
            .send(RecorderCommand::SetMonitor(spec.clone()))
            .unwrap();

        let handle = std::thread::spawn(move || {
            run_recorder(&mut recorder, &status_tx, &command_rx).map(|_| recorder)
        });

        let first = status_rx.recv().unwrap();
        assert_eq!(first.frames_written, 1);
        assert!(first.current_file.is_some());
        assert!(first.connected);
        let second = status_rx.recv().unwrap();
        assert_eq!(second.frames_written, 2);
        assert_eq!(second.files_written, 1);

        command_tx.send(RecorderCommand::Stop).unwrap();
        let recorder = handle.join().unwrap().unwrap();
        assert!(recorder.current_file().is_none());
        assert_eq!(recorder.monitor_spec(), &spec);
    }

    #[test]
    fn test_closed_command_channel_stops() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut recorder = FrameRecorder::new(
            &config,
            ScriptedConnector::default(),
            ManualClock::new(1_570_000_000.0),
        );
        let (status_tx, status_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel::<RecorderCommand>();
        drop(command_tx);

        run_recorder(&mut recorder, &status_tx, &command_rx).unwrap();
        assert!(status_rx.try_recv().is_err());
    }

    #[test]
    fn test_record_rejects_bad_config() {
        let config = Config {
            gap_size: -1.0,
            ..Default::default()
        };
        let (status_tx, _status_rx) = mpsc::channel();
        let (_command_tx, command_rx) = mpsc::channel();
        let result = record(&config, &status_tx, &command_rx);
        assert!(matches!(result, Err(ProcessorError::ConfigError(_))));
    }

    #[test]
    fn test_send_failure_still_closes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let connector = ScriptedConnector::default();
        connector.push(vec![Frame::empty(FrameType::Scan)]);
        let mut recorder =
            FrameRecorder::new(&config, connector, ManualClock::new(1_570_000_000.0));
        let (status_tx, status_rx) = mpsc::channel();
        drop(status_rx);
        let (_command_tx, command_rx) = mpsc::channel::<RecorderCommand>();

        let result = run_recorder(&mut recorder, &status_tx, &command_rx);
        assert!(matches!(result, Err(ProcessorError::SendError(_))));
        assert!(recorder.current_file().is_none());
        assert_eq!(recorder.files_written(), 1);
    }
}
