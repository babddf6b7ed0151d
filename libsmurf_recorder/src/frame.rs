use fxhash::FxHashMap;
use ndarray::{Array2, ArrayView1};
use std::collections::BTreeMap;
use std::fmt::Display;

use super::constants::*;
use super::error::{FrameDecodeError, TimestreamError};

/// Flow control values carried by the `sostream_flowcontrol` key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Alive = 0,
    Start = 1,
    End = 2,
    Cleanse = 3,
}

impl TryFrom<i64> for FlowControl {
    type Error = FrameDecodeError;
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Alive),
            1 => Ok(Self::Start),
            2 => Ok(Self::End),
            3 => Ok(Self::Cleanse),
            _ => Err(FrameDecodeError::BadFlowControl(value)),
        }
    }
}

impl Display for FlowControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alive => write!(f, "ALIVE"),
            Self::Start => write!(f, "START"),
            Self::End => write!(f, "END"),
            Self::Cleanse => write!(f, "CLEANSE"),
        }
    }
}

/// The frame type codes used on the wire and on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    None = 0,
    Wiring = 1,
    Observation = 2,
    Scan = 3,
    EndProcessing = 4,
    PipelineInfo = 5,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameDecodeError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Wiring),
            2 => Ok(Self::Observation),
            3 => Ok(Self::Scan),
            4 => Ok(Self::EndProcessing),
            5 => Ok(Self::PipelineInfo),
            _ => Err(FrameDecodeError::BadFrameType(value)),
        }
    }
}

impl Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Wiring => write!(f, "Wiring"),
            Self::Observation => write!(f, "Observation"),
            Self::Scan => write!(f, "Scan"),
            Self::EndProcessing => write!(f, "EndProcessing"),
            Self::PipelineInfo => write!(f, "PipelineInfo"),
        }
    }
}

/// A scalar value stored under a frame key
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// A block of detector channels sharing a single sample clock.
///
/// Samples are stored as a (channel, sample) matrix. The channel name lookup is built
/// once when the block is made, so every block carries its own index.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestreamMap {
    names: Vec<String>,
    times: Vec<f64>,
    samples: Array2<f64>,
    index: FxHashMap<String, usize>,
}

impl TimestreamMap {
    /// Create a new TimestreamMap, checking that the names and times agree with the sample matrix
    pub fn new(
        names: Vec<String>,
        times: Vec<f64>,
        samples: Array2<f64>,
    ) -> Result<Self, TimestreamError> {
        let (n_chan, n_samp) = samples.dim();
        if names.len() != n_chan {
            return Err(TimestreamError::ChannelCountMismatch(names.len(), n_chan));
        }
        if times.len() != n_samp {
            return Err(TimestreamError::SampleCountMismatch(times.len(), n_samp));
        }
        let mut index = FxHashMap::default();
        for (row, name) in names.iter().enumerate() {
            if index.insert(name.clone(), row).is_some() {
                return Err(TimestreamError::DuplicateChannel(name.clone()));
            }
        }
        Ok(Self {
            names,
            times,
            samples,
            index,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Sample times in seconds
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    pub fn n_channels(&self) -> usize {
        self.names.len()
    }

    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    /// Get the samples for a named channel
    ///
    /// Returns None if the channel is not in this block
    pub fn get(&self, name: &str) -> Option<ArrayView1<f64>> {
        self.index.get(name).map(|row| self.samples.row(*row))
    }

    /// The native sample rate in Hz.
    ///
    /// Returns None when it cannot be computed (fewer than two samples, or the samples do
    /// not advance in time).
    pub fn sample_rate(&self) -> Option<f64> {
        let n = self.times.len();
        if n < 2 {
            return None;
        }
        let span = self.times[n - 1] - self.times[0];
        if span > 0.0 && span.is_finite() {
            Some((n - 1) as f64 / span)
        } else {
            None
        }
    }
}

/// The payload of a Scan frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanFrame {
    pub fields: FieldMap,
    pub data: Option<TimestreamMap>,
}

/// A single frame of the stream.
///
/// Each variant is one of the frame types we care about; anything unrecognized by type
/// is Unclassified. Flow control frames are typically Unclassified with the flow control
/// key set.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Wiring(FieldMap),
    Observation(FieldMap),
    Scan(ScanFrame),
    EndProcessing,
    PipelineInfo(FieldMap),
    Unclassified(FieldMap),
}

impl Frame {
    /// Make a flow control frame
    pub fn flow_control_frame(flow: FlowControl) -> Self {
        let mut fields = FieldMap::new();
        fields.insert(
            String::from(FLOW_CONTROL_KEY),
            FieldValue::Int(flow as i64),
        );
        Self::Unclassified(fields)
    }

    /// Make an empty frame of the given type
    pub fn empty(frame_type: FrameType) -> Self {
        match frame_type {
            FrameType::None => Self::Unclassified(FieldMap::new()),
            FrameType::Wiring => Self::Wiring(FieldMap::new()),
            FrameType::Observation => Self::Observation(FieldMap::new()),
            FrameType::Scan => Self::Scan(ScanFrame::default()),
            FrameType::EndProcessing => Self::EndProcessing,
            FrameType::PipelineInfo => Self::PipelineInfo(FieldMap::new()),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Wiring(_) => FrameType::Wiring,
            Self::Observation(_) => FrameType::Observation,
            Self::Scan(_) => FrameType::Scan,
            Self::EndProcessing => FrameType::EndProcessing,
            Self::PipelineInfo(_) => FrameType::PipelineInfo,
            Self::Unclassified(_) => FrameType::None,
        }
    }

    /// The scalar fields of the frame. EndProcessing frames have none.
    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            Self::Wiring(f)
            | Self::Observation(f)
            | Self::PipelineInfo(f)
            | Self::Unclassified(f) => Some(f),
            Self::Scan(scan) => Some(&scan.fields),
            Self::EndProcessing => None,
        }
    }

    pub fn fields_mut(&mut self) -> Option<&mut FieldMap> {
        match self {
            Self::Wiring(f)
            | Self::Observation(f)
            | Self::PipelineInfo(f)
            | Self::Unclassified(f) => Some(f),
            Self::Scan(scan) => Some(&mut scan.fields),
            Self::EndProcessing => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields().and_then(|f| f.get(key))
    }

    /// Set a field. Ignored for EndProcessing frames.
    pub fn insert(&mut self, key: &str, value: FieldValue) -> &mut Self {
        if let Some(fields) = self.fields_mut() {
            fields.insert(String::from(key), value);
        }
        self
    }

    /// The flow control tag, if any. Values are checked when frames are decoded, so an
    /// out of range value here means the frame was built by hand and is treated as untagged.
    pub fn flow_control(&self) -> Option<FlowControl> {
        match self.get(FLOW_CONTROL_KEY) {
            Some(FieldValue::Int(v)) => FlowControl::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Whether the frame carries the flow control key at all
    pub fn is_flow_control(&self) -> bool {
        self.get(FLOW_CONTROL_KEY).is_some()
    }

    /// The stream identifier, if present and non-empty
    pub fn stream_id(&self) -> Option<&str> {
        match self.get(STREAM_ID_KEY) {
            Some(FieldValue::Str(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<i64> {
        match self.get(SESSION_ID_KEY) {
            Some(FieldValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn timestreams(&self) -> Option<&TimestreamMap> {
        match self {
            Self::Scan(scan) => scan.data.as_ref(),
            _ => None,
        }
    }

    /// Check the well known keys hold the expected kinds of values
    pub fn validate(&self) -> Result<(), FrameDecodeError> {
        let fields = match self.fields() {
            Some(f) => f,
            None => return Ok(()),
        };
        match fields.get(FLOW_CONTROL_KEY) {
            Some(FieldValue::Int(v)) => {
                FlowControl::try_from(*v)?;
            }
            Some(_) => return Err(FrameDecodeError::BadFieldType(String::from(FLOW_CONTROL_KEY))),
            None => (),
        }
        match fields.get(STREAM_ID_KEY) {
            Some(FieldValue::Str(_)) | None => (),
            Some(_) => return Err(FrameDecodeError::BadFieldType(String::from(STREAM_ID_KEY))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn make_block() -> TimestreamMap {
        TimestreamMap::new(
            vec![String::from("r0000"), String::from("r0001")],
            vec![0.0, 0.5, 1.0],
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_flow_control_accessor() {
        let frame = Frame::flow_control_frame(FlowControl::End);
        assert_eq!(frame.flow_control(), Some(FlowControl::End));
        assert!(frame.is_flow_control());
        assert_eq!(frame.frame_type(), FrameType::None);

        let frame = Frame::empty(FrameType::Observation);
        assert_eq!(frame.flow_control(), None);
        assert!(!frame.is_flow_control());
    }

    #[test]
    fn test_stream_id_ignores_empty() {
        let mut frame = Frame::empty(FrameType::Scan);
        frame.insert(STREAM_ID_KEY, FieldValue::Str(String::new()));
        assert_eq!(frame.stream_id(), None);
        frame.insert(STREAM_ID_KEY, FieldValue::Str(String::from("crate1slot2")));
        assert_eq!(frame.stream_id(), Some("crate1slot2"));
    }

    #[test]
    fn test_timestream_lookup_and_rate() {
        let block = make_block();
        assert_eq!(block.get("r0001").unwrap().to_vec(), vec![4.0, 5.0, 6.0]);
        assert!(block.get("r0002").is_none());
        assert_eq!(block.sample_rate(), Some(2.0));
    }

    #[test]
    fn test_timestream_rate_undefined() {
        let block =
            TimestreamMap::new(vec![String::from("r0000")], vec![3.0], array![[1.0]]).unwrap();
        assert_eq!(block.sample_rate(), None);
    }

    #[test]
    fn test_timestream_shape_checked() {
        let result = TimestreamMap::new(
            vec![String::from("r0000")],
            vec![0.0, 1.0, 2.0],
            array![[1.0, 2.0]],
        );
        assert!(matches!(
            result,
            Err(TimestreamError::SampleCountMismatch(3, 2))
        ));
        let result = TimestreamMap::new(
            vec![String::from("a"), String::from("a")],
            vec![0.0],
            array![[1.0], [2.0]],
        );
        assert!(matches!(result, Err(TimestreamError::DuplicateChannel(_))));
    }

    #[test]
    fn test_validate_rejects_bad_flow_control() {
        let mut frame = Frame::empty(FrameType::None);
        frame.insert(FLOW_CONTROL_KEY, FieldValue::Int(7));
        assert!(matches!(
            frame.validate(),
            Err(FrameDecodeError::BadFlowControl(7))
        ));
        frame.insert(FLOW_CONTROL_KEY, FieldValue::Str(String::from("START")));
        assert!(matches!(
            frame.validate(),
            Err(FrameDecodeError::BadFieldType(_))
        ));
    }
}
