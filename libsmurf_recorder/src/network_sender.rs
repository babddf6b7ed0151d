use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use super::codec::encode_frame;
use super::error::SimulatorError;
use super::frame::Frame;

/// Serves a frame stream to any number of TCP readers.
///
/// The listener never blocks; new readers are picked up by `accept_pending`, which `send`
/// calls before every frame. Readers which fail a write are dropped.
#[derive(Debug)]
pub struct NetworkSender {
    listener: TcpListener,
    clients: Vec<(SocketAddr, TcpStream)>,
}

impl NetworkSender {
    pub fn bind<A: ToSocketAddrs>(address: A) -> Result<Self, SimulatorError> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            clients: Vec::new(),
        })
    }

    pub fn local_port(&self) -> Result<u16, SimulatorError> {
        Ok(self.listener.local_addr()?.port())
    }

    pub fn n_clients(&self) -> usize {
        self.clients.len()
    }

    /// Accept every reader waiting on the listener
    pub fn accept_pending(&mut self) -> Result<(), SimulatorError> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    spdlog::info!("Reader connected from {addr}");
                    self.clients.push((addr, stream));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SimulatorError::IOError(e)),
            }
        }
    }

    /// Send a frame to every connected reader
    pub fn send(&mut self, frame: &Frame) -> Result<(), SimulatorError> {
        self.accept_pending()?;
        let bytes = encode_frame(frame)?;
        self.clients.retain_mut(|(addr, stream)| {
            match stream.write_all(&bytes).and_then(|_| stream.flush()) {
                Ok(()) => true,
                Err(e) => {
                    spdlog::info!("Reader at {addr} disconnected: {e}");
                    false
                }
            }
        });
        Ok(())
    }

    /// Drop every reader
    pub fn close(&mut self) {
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_frame;
    use crate::frame::FlowControl;
    use std::time::Duration;

    #[test]
    fn test_send_to_reader() {
        let mut sender = NetworkSender::bind("127.0.0.1:0").unwrap();
        let port = sender.local_port().unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // Give the listener a moment to see the connection
        for _ in 0..100 {
            sender.accept_pending().unwrap();
            if sender.n_clients() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sender.n_clients(), 1);

        sender
            .send(&Frame::flow_control_frame(FlowControl::Cleanse))
            .unwrap();
        let frame = read_frame(&mut stream).unwrap().unwrap();
        assert_eq!(frame.flow_control(), Some(FlowControl::Cleanse));

        sender.close();
        assert_eq!(sender.n_clients(), 0);
    }
}
