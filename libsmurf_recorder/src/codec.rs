//! Binary encoding of Frames.
//!
//! Every frame is a fixed 9 byte header followed by a payload:
//!
//! ```text
//! magic(u32) | frame type(u8) | payload length(u32) | payload
//! payload: n_fields(u32) | { name_len(u16) name tag(u8) value }*
//! ```
//!
//! All integers are little endian. The same encoding is used on the network and on disk.
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use std::io::{Cursor, ErrorKind, Read, Write};

use super::constants::*;
use super::error::{FrameDecodeError, FrameEncodeError};
use super::frame::{FieldMap, FieldValue, Frame, FrameType, ScanFrame, TimestreamMap};

/// Read the next Frame from a reader.
///
/// Returns `Ok(None)` if the reader is exhausted exactly at a frame boundary. A reader
/// that ends part way through a frame is an error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>, FrameDecodeError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    if !fill_header(reader, &mut header)? {
        return Ok(None);
    }

    let magic = LittleEndian::read_u32(&header[0..4]);
    if magic != FRAME_MAGIC {
        return Err(FrameDecodeError::BadMagic(magic));
    }
    let frame_type = FrameType::try_from(header[4])?;
    let payload_size = LittleEndian::read_u32(&header[5..9]);
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(FrameDecodeError::PayloadTooLarge(payload_size));
    }

    let mut payload = vec![0u8; payload_size as usize];
    reader.read_exact(&mut payload)?;
    let frame = decode_payload(frame_type, &payload)?;
    frame.validate()?;
    Ok(Some(frame))
}

/// Total encoded size of the frame at the start of the buffer, if the header is complete
pub fn peek_frame_size(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < FRAME_HEADER_SIZE {
        return None;
    }
    Some(FRAME_HEADER_SIZE + LittleEndian::read_u32(&buffer[5..9]) as usize)
}

/// Write a Frame to a writer. The writer is not flushed.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<(), FrameEncodeError> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Encode a Frame, header included
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameEncodeError> {
    let mut payload: Vec<u8> = Vec::new();
    match frame {
        Frame::EndProcessing => payload.write_u32::<LittleEndian>(0)?,
        Frame::Scan(scan) => {
            let n_fields = scan.fields.len() + usize::from(scan.data.is_some());
            payload.write_u32::<LittleEndian>(n_fields as u32)?;
            write_fields(&mut payload, &scan.fields)?;
            if let Some(data) = &scan.data {
                write_name(&mut payload, SCAN_DATA_KEY)?;
                payload.write_u8(TAG_TIMESTREAMS)?;
                write_timestreams(&mut payload, data)?;
            }
        }
        _ => {
            // Every other variant has a field map
            let fields = frame.fields().cloned().unwrap_or_default();
            payload.write_u32::<LittleEndian>(fields.len() as u32)?;
            write_fields(&mut payload, &fields)?;
        }
    }

    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(FrameEncodeError::PayloadTooLarge(payload.len()));
    }

    let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    bytes.write_u32::<LittleEndian>(FRAME_MAGIC)?;
    bytes.write_u8(frame.frame_type() as u8)?;
    bytes.write_u32::<LittleEndian>(payload.len() as u32)?;
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Fill the header buffer. Returns false on a clean end of stream.
fn fill_header<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<bool, std::io::Error> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn decode_payload(frame_type: FrameType, payload: &[u8]) -> Result<Frame, FrameDecodeError> {
    let mut cursor = Cursor::new(payload);
    let n_fields = cursor.read_u32::<LittleEndian>()?;
    let mut fields = FieldMap::new();
    let mut data: Option<TimestreamMap> = None;

    for _ in 0..n_fields {
        let name = read_string_u16(&mut cursor)?;
        let tag = cursor.read_u8()?;
        match tag {
            TAG_BOOL => {
                fields.insert(name, FieldValue::Bool(cursor.read_u8()? != 0));
            }
            TAG_INT => {
                fields.insert(name, FieldValue::Int(cursor.read_i64::<LittleEndian>()?));
            }
            TAG_DOUBLE => {
                fields.insert(name, FieldValue::Double(cursor.read_f64::<LittleEndian>()?));
            }
            TAG_STRING => {
                let len = cursor.read_u32::<LittleEndian>()? as usize;
                fields.insert(name, FieldValue::Str(read_utf8(&mut cursor, len)?));
            }
            TAG_TIMESTREAMS => {
                // Timestream blocks only belong in the data key of Scan frames
                if frame_type != FrameType::Scan || name != SCAN_DATA_KEY {
                    return Err(FrameDecodeError::BadFieldType(name));
                }
                data = Some(read_timestreams(&mut cursor)?);
            }
            _ => return Err(FrameDecodeError::BadValueTag(tag)),
        }
    }

    if cursor.position() != payload.len() as u64 {
        return Err(FrameDecodeError::PayloadSizeMismatch(
            payload.len() as u32,
            cursor.position(),
        ));
    }

    Ok(match frame_type {
        FrameType::None => Frame::Unclassified(fields),
        FrameType::Wiring => Frame::Wiring(fields),
        FrameType::Observation => Frame::Observation(fields),
        FrameType::Scan => {
            if fields.contains_key(SCAN_DATA_KEY) {
                return Err(FrameDecodeError::BadFieldType(String::from(SCAN_DATA_KEY)));
            }
            Frame::Scan(ScanFrame { fields, data })
        }
        FrameType::EndProcessing => Frame::EndProcessing,
        FrameType::PipelineInfo => Frame::PipelineInfo(fields),
    })
}

fn read_utf8(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<String, FrameDecodeError> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if len as u64 > remaining {
        return Err(FrameDecodeError::IOError(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "string runs past the end of the frame",
        )));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

fn read_string_u16(cursor: &mut Cursor<&[u8]>) -> Result<String, FrameDecodeError> {
    let len = cursor.read_u16::<LittleEndian>()? as usize;
    read_utf8(cursor, len)
}

fn read_timestreams(cursor: &mut Cursor<&[u8]>) -> Result<TimestreamMap, FrameDecodeError> {
    let n_chan = cursor.read_u32::<LittleEndian>()? as usize;
    let n_samp = cursor.read_u32::<LittleEndian>()? as usize;

    // Guard the allocations against a corrupt header
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    let needed = (n_chan as u64 + 1)
        .checked_mul(n_samp as u64)
        .and_then(|n| n.checked_mul(8))
        .and_then(|n| n.checked_add(2 * n_chan as u64));
    if needed.map_or(true, |n| n > remaining) {
        return Err(FrameDecodeError::IOError(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "timestream block runs past the end of the frame",
        )));
    }

    let mut names = Vec::with_capacity(n_chan);
    for _ in 0..n_chan {
        names.push(read_string_u16(cursor)?);
    }
    let mut times = vec![0.0; n_samp];
    cursor.read_f64_into::<LittleEndian>(&mut times)?;
    let mut flat = vec![0.0; n_chan * n_samp];
    cursor.read_f64_into::<LittleEndian>(&mut flat)?;
    let samples = Array2::from_shape_vec((n_chan, n_samp), flat).map_err(|_| {
        FrameDecodeError::BadFieldType(String::from(SCAN_DATA_KEY))
    })?;
    Ok(TimestreamMap::new(names, times, samples)?)
}

fn write_name(buffer: &mut Vec<u8>, name: &str) -> Result<(), FrameEncodeError> {
    let len = u16::try_from(name.len()).map_err(|_| FrameEncodeError::NameTooLong(String::from(name)))?;
    buffer.write_u16::<LittleEndian>(len)?;
    buffer.extend_from_slice(name.as_bytes());
    Ok(())
}

fn write_fields(buffer: &mut Vec<u8>, fields: &FieldMap) -> Result<(), FrameEncodeError> {
    for (name, value) in fields.iter() {
        write_name(buffer, name)?;
        match value {
            FieldValue::Bool(v) => {
                buffer.write_u8(TAG_BOOL)?;
                buffer.write_u8(u8::from(*v))?;
            }
            FieldValue::Int(v) => {
                buffer.write_u8(TAG_INT)?;
                buffer.write_i64::<LittleEndian>(*v)?;
            }
            FieldValue::Double(v) => {
                buffer.write_u8(TAG_DOUBLE)?;
                buffer.write_f64::<LittleEndian>(*v)?;
            }
            FieldValue::Str(v) => {
                buffer.write_u8(TAG_STRING)?;
                buffer.write_u32::<LittleEndian>(v.len() as u32)?;
                buffer.extend_from_slice(v.as_bytes());
            }
        }
    }
    Ok(())
}

fn write_timestreams(buffer: &mut Vec<u8>, data: &TimestreamMap) -> Result<(), FrameEncodeError> {
    buffer.write_u32::<LittleEndian>(data.n_channels() as u32)?;
    buffer.write_u32::<LittleEndian>(data.n_samples() as u32)?;
    for name in data.names() {
        write_name(buffer, name)?;
    }
    for t in data.times() {
        buffer.write_f64::<LittleEndian>(*t)?;
    }
    // Logical (row-major) order regardless of memory layout
    for value in data.samples().iter() {
        buffer.write_f64::<LittleEndian>(*value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FlowControl;
    use ndarray::array;

    fn make_scan() -> Frame {
        let block = TimestreamMap::new(
            vec![String::from("r0012"), String::from("r0013")],
            vec![10.0, 10.1, 10.2],
            array![[0.5, 0.25, -1.0], [3.0, 2.0, 1.0]],
        )
        .unwrap();
        let mut fields = FieldMap::new();
        fields.insert(String::from(FRAME_NUM_KEY), FieldValue::Int(4));
        fields.insert(
            String::from(STREAM_ID_KEY),
            FieldValue::Str(String::from("crate1slot3")),
        );
        Frame::Scan(ScanFrame {
            fields,
            data: Some(block),
        })
    }

    #[test]
    fn test_scan_frame_survives_encoding() {
        let frame = make_scan();
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(peek_frame_size(&bytes), Some(bytes.len()));

        let mut cursor = Cursor::new(bytes);
        let decoded = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.stream_id(), Some("crate1slot3"));
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &Frame::flow_control_frame(FlowControl::Start)).unwrap();
        write_frame(&mut bytes, &Frame::EndProcessing).unwrap();
        let mut cursor = Cursor::new(bytes);
        let first = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first.flow_control(), Some(FlowControl::Start));
        let second = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(second, Frame::EndProcessing);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode_frame(&Frame::EndProcessing).unwrap();
        bytes[0] = 0xFF;
        let result = read_frame(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(FrameDecodeError::BadMagic(_))));
    }

    #[test]
    fn test_bad_flow_control_rejected() {
        let mut frame = Frame::flow_control_frame(FlowControl::Alive);
        frame.insert(FLOW_CONTROL_KEY, FieldValue::Int(9));
        let bytes = encode_frame(&frame).unwrap();
        let result = read_frame(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(FrameDecodeError::BadFlowControl(9))));
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let bytes = encode_frame(&make_scan()).unwrap();
        let truncated = bytes[..bytes.len() - 3].to_vec();
        assert!(read_frame(&mut Cursor::new(truncated)).is_err());
        let header_only = bytes[..4].to_vec();
        assert!(read_frame(&mut Cursor::new(header_only)).is_err());
    }

    #[test]
    fn test_timestreams_outside_scan_rejected() {
        let mut bytes = encode_frame(&make_scan()).unwrap();
        bytes[4] = FrameType::Observation as u8;
        let result = read_frame(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(FrameDecodeError::BadFieldType(_))));
    }

    #[test]
    fn test_huge_timestream_header_rejected() {
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(1).unwrap();
        payload
            .write_u16::<LittleEndian>(SCAN_DATA_KEY.len() as u16)
            .unwrap();
        payload.extend_from_slice(SCAN_DATA_KEY.as_bytes());
        payload.write_u8(TAG_TIMESTREAMS).unwrap();
        payload.write_u32::<LittleEndian>(u32::MAX).unwrap();
        payload.write_u32::<LittleEndian>(u32::MAX).unwrap();

        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(FRAME_MAGIC).unwrap();
        bytes.write_u8(FrameType::Scan as u8).unwrap();
        bytes
            .write_u32::<LittleEndian>(payload.len() as u32)
            .unwrap();
        bytes.extend_from_slice(&payload);

        let result = read_frame(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(FrameDecodeError::IOError(_))));
    }
}
