// Frame wire format
pub const FRAME_MAGIC: u32 = 0x4733_4652; // "G3FR"
pub const FRAME_HEADER_SIZE: usize = 9; // magic(4) + type(1) + payload length(4)
pub const MAX_PAYLOAD_SIZE: u32 = 512 * 1024 * 1024;

// Field value tags
pub const TAG_BOOL: u8 = 0;
pub const TAG_INT: u8 = 1;
pub const TAG_DOUBLE: u8 = 2;
pub const TAG_STRING: u8 = 3;
pub const TAG_TIMESTREAMS: u8 = 4;

// Well known frame keys
pub const FLOW_CONTROL_KEY: &str = "sostream_flowcontrol";
pub const STREAM_ID_KEY: &str = "sostream_id";
pub const SCAN_DATA_KEY: &str = "data";
pub const SESSION_ID_KEY: &str = "session_id";
pub const START_TIME_KEY: &str = "start_time";
pub const FRAME_NUM_KEY: &str = "frame_num";

// Output file naming
pub const DAY_BUCKET_DIGITS: usize = 5;
pub const DEFAULT_FILE_EXTENSION: &str = "g3";

// Frame source
pub const RECONNECT_INTERVAL_SECONDS: f64 = 1.0;
pub const MAX_READ_TIMEOUT_SECONDS: f64 = 3600.0;
pub const MAX_FRAMES_PER_READ: usize = 256;
