#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec4;
use simp::net::{DEFAULT_MAX_SUBJECT_LEN, Frame, FrameReader, MessageType, PROTOCOL_VERSION};
use simp::source::memory::{AxisTransform, InMemoryStore, LinearColormap};
use simp::{DataSources, SyncConfig};

pub const TIMEOUT: Duration = Duration::from_secs(3);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sources() -> DataSources {
    DataSources::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(AxisTransform),
        Arc::new(LinearColormap::new(Vec4::ZERO, Vec4::ONE)),
    )
}

pub fn fast_config(address: &str) -> SyncConfig {
    SyncConfig {
        address: address.to_string(),
        retry_delay_ms: 50,
        read_timeout_ms: 20,
        ..Default::default()
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Stand-in for the visualization engine.
pub struct MockPeer {
    listener: TcpListener,
}

impl MockPeer {
    pub fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").unwrap(),
        }
    }

    pub fn address(&self) -> String {
        self.listener.local_addr().unwrap().to_string()
    }

    pub fn accept(&self) -> PeerStream {
        let (stream, _) = self.listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        PeerStream {
            stream,
            reader: FrameReader::new(PROTOCOL_VERSION, DEFAULT_MAX_SUBJECT_LEN),
            closed: false,
        }
    }
}

pub struct PeerStream {
    stream: TcpStream,
    reader: FrameReader,
    closed: bool,
}

impl PeerStream {
    pub fn send(&mut self, message_type: MessageType, subject: &[u8]) {
        self.send_raw(&Frame::build(PROTOCOL_VERSION, message_type, subject));
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Next complete frame, or `None` once `timeout` passes or the client
    /// closes the stream.
    pub fn recv(&mut self, timeout: Duration) -> Option<Frame> {
        let start = Instant::now();
        let mut buffer = [0u8; 4096];
        loop {
            if let Some(frame) = self.reader.next_frame().unwrap() {
                return Some(frame);
            }
            if self.closed || start.elapsed() >= timeout {
                return None;
            }
            match self.stream.read(&mut buffer) {
                Ok(0) => self.closed = true,
                Ok(n) => self.reader.push(&buffer[..n]),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(_) => self.closed = true,
            }
        }
    }

    pub fn expect(&mut self, message_type: MessageType) -> Frame {
        let frame = self
            .recv(TIMEOUT)
            .unwrap_or_else(|| panic!("No {} frame received", message_type));
        assert_eq!(frame.message_type, message_type);
        frame
    }

    /// Reads until the client closes its side.
    pub fn wait_closed(&mut self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.recv(Duration::from_millis(20)).is_none() && self.closed {
                return true;
            }
        }
        self.closed
    }

    /// Accepts the client's `CONN` and answers it.
    pub fn handshake(&mut self) -> Frame {
        let hello = self.expect(MessageType::Connection);
        self.send(MessageType::Connection, b"OpenSpace;");
        hello
    }
}
