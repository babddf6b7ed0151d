use super::clock::Clock;
use super::error::FileManagerError;
use super::file_manager::FileManager;
use super::frame::{FlowControl, Frame, FrameType};

/// Split a batch into its flow control tags and the frames which carry data.
///
/// Tags keep their order of arrival. Tagged frames and PipelineInfo frames never make it
/// into the data; everything else does, in order.
pub fn partition(frames: Vec<Frame>) -> (Vec<FlowControl>, Vec<Frame>) {
    let mut controls = Vec::new();
    let mut data = Vec::with_capacity(frames.len());
    for frame in frames {
        if frame.is_flow_control() {
            match frame.flow_control() {
                Some(flow) => controls.push(flow),
                None => spdlog::warn!("Dropping frame with unreadable flow control value"),
            }
        } else if frame.frame_type() != FrameType::PipelineInfo {
            data.push(frame);
        }
    }
    (controls, data)
}

/// Act on every flow control frame in the batch, then return the data frames.
///
/// START and END close the current file (END also forgets the cached metadata). Every
/// action happens before any frame of this batch is written, so a batch beginning with
/// START never leaks into the previous acquisition's file.
pub fn process_flow_control<K: Clock>(
    frames: Vec<Frame>,
    files: &mut FileManager<K>,
) -> Result<Vec<Frame>, FileManagerError> {
    let (controls, data) = partition(frames);
    for flow in controls {
        files.handle_flow_control(flow)?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::frame::FieldValue;

    fn make_manager(dir: &std::path::Path) -> FileManager<ManualClock> {
        let config = Config {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        FileManager::new(&config, ManualClock::new(1_570_000_000.0))
    }

    #[test]
    fn test_partition_drops_control_and_pipeline() {
        let mut plain = Frame::empty(FrameType::None);
        plain.insert("test", FieldValue::Double(1.0));
        let frames = vec![
            Frame::flow_control_frame(FlowControl::Alive),
            Frame::empty(FrameType::Scan),
            Frame::empty(FrameType::PipelineInfo),
            Frame::flow_control_frame(FlowControl::Cleanse),
            plain.clone(),
            Frame::flow_control_frame(FlowControl::End),
        ];
        let (controls, data) = partition(frames);
        assert_eq!(
            controls,
            vec![FlowControl::Alive, FlowControl::Cleanse, FlowControl::End]
        );
        // Untagged frames of type None are still data
        assert_eq!(data, vec![Frame::empty(FrameType::Scan), plain]);
    }

    #[test]
    fn test_tagged_observation_is_dropped() {
        let mut frame = Frame::empty(FrameType::Observation);
        frame.insert(
            crate::constants::FLOW_CONTROL_KEY,
            FieldValue::Int(FlowControl::Cleanse as i64),
        );
        let (controls, data) = partition(vec![frame]);
        assert_eq!(controls, vec![FlowControl::Cleanse]);
        assert!(data.is_empty());
    }

    #[test]
    fn test_start_frame_processing() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = make_manager(dir.path());
        files.create_new_file(&[]).unwrap();

        let data = process_flow_control(
            vec![Frame::flow_control_frame(FlowControl::Start)],
            &mut files,
        )
        .unwrap();
        assert!(!files.is_open());
        assert_eq!(files.filename_suffix(), 0);
        assert!(data.is_empty());
    }

    #[test]
    fn test_end_frame_processing() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = make_manager(dir.path());
        let mut batch = vec![Frame::empty(FrameType::Observation)];
        files.create_new_file(&batch).unwrap();
        files.write_frames_to_file(&mut batch).unwrap();
        assert!(files.last_meta().is_some());

        let data = process_flow_control(
            vec![Frame::flow_control_frame(FlowControl::End)],
            &mut files,
        )
        .unwrap();
        assert!(!files.is_open());
        assert_eq!(files.filename_suffix(), 0);
        assert!(files.last_meta().is_none());
        assert!(data.is_empty());
    }

    #[test]
    fn test_alive_and_cleanse_leave_file_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = make_manager(dir.path());
        files.create_new_file(&[]).unwrap();

        let data = process_flow_control(
            vec![
                Frame::flow_control_frame(FlowControl::Alive),
                Frame::flow_control_frame(FlowControl::Cleanse),
            ],
            &mut files,
        )
        .unwrap();
        assert!(files.is_open());
        assert!(data.is_empty());
    }

    #[test]
    fn test_cleanse_with_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = make_manager(dir.path());
        process_flow_control(
            vec![Frame::flow_control_frame(FlowControl::Cleanse)],
            &mut files,
        )
        .unwrap();
        assert!(!files.is_open());
        assert_eq!(files.filename_suffix(), 0);
    }
}
