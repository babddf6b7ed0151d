use std::io::{BufReader, ErrorKind};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::codec::{peek_frame_size, read_frame};
use super::constants::{MAX_FRAMES_PER_READ, RECONNECT_INTERVAL_SECONDS};
use super::error::{FrameDecodeError, SourceError};
use super::frame::Frame;

const TCP_SCHEME: &str = "tcp://";
const READ_BUFFER_SIZE: usize = 1 << 20;

/// A live connection to a frame sender
pub trait FrameConnection {
    /// Wait for frames, up to the read timeout given when the connection was made.
    ///
    /// An empty Vec means nothing arrived before the timeout.
    fn poll_frames(&mut self) -> Result<Vec<Frame>, SourceError>;
}

/// Opens connections to a frame sender
pub trait Connector {
    type Connection: FrameConnection;

    fn connect(&mut self, timeout: Duration) -> Result<Self::Connection, SourceError>;

    fn address(&self) -> &str;
}

/// The result of a single read from a FrameSource
#[derive(Debug)]
pub enum ReadOutcome {
    /// Frames arrived (never empty)
    Frames(Vec<Frame>),
    /// No connection could be made; nothing was read
    Unavailable,
    /// The connection timed out or failed and has been dropped
    Lost,
}

impl ReadOutcome {
    pub fn into_frames(self) -> Vec<Frame> {
        match self {
            Self::Frames(frames) => frames,
            _ => Vec::new(),
        }
    }
}

/// FrameSource owns the connection to the frame sender and keeps it alive.
///
/// Connection attempts are rate limited to one per second. Failures are logged and never
/// returned; the source simply retries on the next read.
#[derive(Debug)]
pub struct FrameSource<C: Connector> {
    connector: C,
    connection: Option<C::Connection>,
    timeout: Duration,
    last_connection_time: Option<Instant>,
    data_received: bool,
}

impl<C: Connector> FrameSource<C> {
    pub fn new(connector: C, timeout: Duration) -> Self {
        Self {
            connector,
            connection: None,
            timeout,
            last_connection_time: None,
            data_received: false,
        }
    }

    /// Read whatever frames are available, connecting first if needed
    pub fn read(&mut self) -> ReadOutcome {
        if self.connection.is_none() {
            self.establish_connection();
        }

        let result = match self.connection.as_mut() {
            Some(connection) => connection.poll_frames(),
            None => return ReadOutcome::Unavailable,
        };

        match result {
            Ok(frames) if !frames.is_empty() => {
                if !self.data_received {
                    self.data_received = true;
                    spdlog::info!("Started receiving frames from {}", self.connector.address());
                }
                ReadOutcome::Frames(frames)
            }
            Ok(_) => {
                if self.data_received {
                    spdlog::info!("Could not read frames. Connection timed out, or sender offline. Cleaning up...");
                }
                self.drop_connection();
                ReadOutcome::Lost
            }
            Err(e) => {
                spdlog::warn!("Lost connection to {}: {e}", self.connector.address());
                self.drop_connection();
                ReadOutcome::Lost
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn data_received(&self) -> bool {
        self.data_received
    }

    pub fn address(&self) -> &str {
        self.connector.address()
    }

    pub fn drop_connection(&mut self) {
        self.connection = None;
        self.data_received = false;
    }

    /// Attempt a single connection, waiting first if the last attempt was very recent
    fn establish_connection(&mut self) {
        if let Some(last) = self.last_connection_time {
            let t_diff = last.elapsed().as_secs_f64();
            if t_diff < RECONNECT_INTERVAL_SECONDS {
                let wait = RECONNECT_INTERVAL_SECONDS - t_diff;
                spdlog::debug!(
                    "Last connection was only {:.3} seconds ago. Sleeping for {:.3}.",
                    t_diff,
                    wait
                );
                std::thread::sleep(Duration::from_secs_f64(wait));
            }
        }
        self.last_connection_time = Some(Instant::now());

        match self.connector.connect(self.timeout) {
            Ok(connection) => {
                spdlog::debug!("Connection to {} established!", self.connector.address());
                self.connection = Some(connection);
            }
            Err(e) => {
                spdlog::error!("Could not connect to {}: {e}", self.connector.address());
            }
        }
    }
}

/// Connects to a NetworkSender over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Address in the form `tcp://host:port` (the scheme is optional)
    pub fn new(address: &str) -> Self {
        Self {
            address: String::from(address),
        }
    }

    fn socket_addresses(&self) -> Result<Vec<SocketAddr>, SourceError> {
        let host_port = self
            .address
            .strip_prefix(TCP_SCHEME)
            .unwrap_or(&self.address);
        let addrs: Vec<SocketAddr> = host_port
            .to_socket_addrs()
            .map_err(|_| SourceError::BadAddress(self.address.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(SourceError::BadAddress(self.address.clone()));
        }
        Ok(addrs)
    }
}

impl Connector for TcpConnector {
    type Connection = TcpConnection;

    fn connect(&mut self, timeout: Duration) -> Result<TcpConnection, SourceError> {
        let mut last_error: Option<std::io::Error> = None;
        for addr in self.socket_addresses()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(TcpConnection {
                        reader: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
                        pending_error: None,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(SourceError::IOError(e)),
            None => Err(SourceError::BadAddress(self.address.clone())),
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// A TCP connection to a NetworkSender
#[derive(Debug)]
pub struct TcpConnection {
    reader: BufReader<TcpStream>,
    // A bad frame found behind good ones; reported on the next poll
    pending_error: Option<FrameDecodeError>,
}

impl FrameConnection for TcpConnection {
    /// Block for one frame, then take any further frames that are already fully buffered
    fn poll_frames(&mut self) -> Result<Vec<Frame>, SourceError> {
        if let Some(e) = self.pending_error.take() {
            return Err(SourceError::DecodeError(e));
        }

        let first = match read_frame(&mut self.reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(SourceError::Closed),
            Err(FrameDecodeError::IOError(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Ok(Vec::new())
            }
            Err(e) => return Err(SourceError::DecodeError(e)),
        };

        let mut frames = vec![first];
        while frames.len() < MAX_FRAMES_PER_READ {
            let buffered = self.reader.buffer();
            match peek_frame_size(buffered) {
                Some(size) if size <= buffered.len() => match read_frame(&mut self.reader) {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break,
                    Err(e) => {
                        spdlog::warn!(
                            "Malformed frame after {} good frames, keeping those: {e}",
                            frames.len()
                        );
                        self.pending_error = Some(e);
                        break;
                    }
                },
                _ => break,
            }
        }
        Ok(frames)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedConnector;
    use super::*;
    use crate::codec::encode_frame;
    use crate::frame::{FlowControl, FrameType};
    use crate::network_sender::NetworkSender;
    use std::io::Write;

    #[test]
    fn test_frames_then_timeout_drops_connection() {
        let connector = ScriptedConnector::default();
        connector.push(vec![Frame::flow_control_frame(FlowControl::Alive)]);
        let mut source = FrameSource::new(connector.clone(), Duration::from_millis(10));

        let outcome = source.read();
        assert_eq!(outcome.into_frames().len(), 1);
        assert!(source.is_connected());
        assert!(source.data_received());

        assert!(matches!(source.read(), ReadOutcome::Lost));
        assert!(!source.is_connected());
        assert!(!source.data_received());
    }

    #[test]
    fn test_connection_error_is_lost() {
        let connector = ScriptedConnector::default();
        connector.push_error(SourceError::Closed);
        let mut source = FrameSource::new(connector, Duration::from_millis(10));
        assert!(matches!(source.read(), ReadOutcome::Lost));
        assert!(!source.is_connected());
    }

    #[test]
    fn test_failed_connection_is_unavailable() {
        let connector = ScriptedConnector::default();
        *connector.refuse.lock().unwrap() = true;
        let mut source = FrameSource::new(connector.clone(), Duration::from_millis(10));
        assert!(matches!(source.read(), ReadOutcome::Unavailable));
        assert_eq!(connector.attempts(), 1);
    }

    #[test]
    fn test_rapid_reconnects_are_rate_limited() {
        let connector = ScriptedConnector::default();
        *connector.refuse.lock().unwrap() = true;
        let mut source = FrameSource::new(connector.clone(), Duration::from_millis(10));

        let start = Instant::now();
        source.read();
        source.read();
        assert_eq!(connector.attempts(), 2);
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn test_bad_address() {
        let mut connector = TcpConnector::new("tcp://not a host");
        assert!(connector.connect(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_malformed_frame_keeps_earlier_frames() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut bytes = encode_frame(&Frame::flow_control_frame(FlowControl::Start)).unwrap();
        bytes.extend(encode_frame(&Frame::empty(FrameType::Scan)).unwrap());
        let mut corrupt = encode_frame(&Frame::EndProcessing).unwrap();
        corrupt[0] = 0xFF;
        bytes.extend(corrupt);

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&bytes).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });

        let mut source = FrameSource::new(
            TcpConnector::new(&format!("tcp://127.0.0.1:{port}")),
            Duration::from_secs(2),
        );
        let frames = source.read().into_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].flow_control(), Some(FlowControl::Start));
        assert_eq!(frames[1].frame_type(), FrameType::Scan);

        // The bad frame drops the connection on the next read
        assert!(matches!(source.read(), ReadOutcome::Lost));
        assert!(!source.is_connected());
        handle.join().unwrap();
    }

    #[test]
    fn test_tcp_loopback() {
        let mut sender = NetworkSender::bind("127.0.0.1:0").unwrap();
        let port = sender.local_port().unwrap();

        let handle = std::thread::spawn(move || {
            for _ in 0..150 {
                sender.accept_pending().unwrap();
                if sender.n_clients() > 0 {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            sender
                .send(&Frame::flow_control_frame(FlowControl::Alive))
                .unwrap();
            sender
                .send(&Frame::flow_control_frame(FlowControl::End))
                .unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });

        let mut source = FrameSource::new(
            TcpConnector::new(&format!("tcp://127.0.0.1:{port}")),
            Duration::from_secs(2),
        );
        let mut received = Vec::new();
        for _ in 0..5 {
            received.extend(source.read().into_frames());
            if received.len() >= 2 {
                break;
            }
        }
        handle.join().unwrap();

        assert_eq!(received.len(), 2);
        assert_eq!(received[0].flow_control(), Some(FlowControl::Alive));
        assert_eq!(received[1].flow_control(), Some(FlowControl::End));
    }
}
