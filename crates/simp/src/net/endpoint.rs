use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::SyncConfig;

use super::connection::ConnectionError;
use super::protocol::{Frame, FrameReader, HEADER_LEN, MessageType, ProtocolVersion};
use super::stats::StatsRecorder;

const RECV_BUFFER_SIZE: usize = 64 * 1024;

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Opens the stream and splits it into a control handle (used only for
/// shutdown), a write half and a read half.
pub fn open(
    addr: SocketAddr,
    config: &SyncConfig,
    stats: Arc<StatsRecorder>,
) -> io::Result<(TcpStream, FrameSender, FrameReceiver)> {
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())?;
    stream.set_nodelay(true)?;
    // handshake polls are one retry delay long
    stream.set_read_timeout(Some(config.retry_delay()))?;
    stream.set_write_timeout(Some(config.write_timeout()))?;

    let control = stream.try_clone()?;
    let writer = stream.try_clone()?;
    log::debug!("connected to {} from {}", addr, stream.local_addr()?);

    let sender = FrameSender {
        stream: writer,
        version: config.protocol_version,
        send_retries: config.send_retries,
        retry_delay: config.retry_delay(),
        stats: Arc::clone(&stats),
    };
    let receiver = FrameReceiver {
        stream,
        reader: FrameReader::new(config.protocol_version, config.max_subject_len),
        buffer: vec![0u8; RECV_BUFFER_SIZE],
        stats,
    };
    Ok((control, sender, receiver))
}

pub fn shutdown(control: &TcpStream) {
    match control.shutdown(Shutdown::Both) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
        Err(err) => log::warn!("socket shutdown failed: {}", err),
    }
}

pub struct FrameSender {
    stream: TcpStream,
    version: ProtocolVersion,
    send_retries: u32,
    retry_delay: Duration,
    stats: Arc<StatsRecorder>,
}

impl FrameSender {
    /// Writes one frame. A partial write resumes where it stopped; transient
    /// errors are retried up to `send_retries` times.
    pub fn send(&mut self, message_type: MessageType, subject: &[u8]) -> io::Result<()> {
        let data = Frame::build(self.version, message_type, subject);
        let mut written = 0;
        let mut retries = 0;

        while written < data.len() {
            match self.stream.write(&data[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket closed during write",
                    ));
                }
                Ok(n) => written += n,
                Err(err) if is_transient(&err) && retries < self.send_retries => {
                    retries += 1;
                    self.stats.record_retry();
                    log::debug!(
                        "{} write stalled at {}/{} bytes ({}), retry {}/{}",
                        message_type,
                        written,
                        data.len(),
                        err,
                        retries,
                        self.send_retries
                    );
                    thread::sleep(self.retry_delay);
                }
                Err(err) => return Err(err),
            }
        }

        self.stats.record_sent(data.len());
        log::trace!("sent {} with {} byte subject", message_type, subject.len());
        Ok(())
    }
}

#[derive(Debug)]
pub enum Inbound {
    Frames(Vec<Frame>),
    Closed,
}

pub struct FrameReceiver {
    stream: TcpStream,
    reader: FrameReader,
    buffer: Vec<u8>,
    stats: Arc<StatsRecorder>,
}

impl FrameReceiver {
    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    /// Performs one bounded read. A timeout yields no frames. Message-local
    /// errors are logged and the message is dropped.
    pub fn receive(&mut self) -> Result<Inbound, ConnectionError> {
        let n = match self.stream.read(&mut self.buffer) {
            Ok(0) => {
                self.reader.finish().map_err(ConnectionError::Protocol)?;
                return Ok(Inbound::Closed);
            }
            Ok(n) => n,
            Err(err) if is_transient(&err) => return Ok(Inbound::Frames(Vec::new())),
            Err(err) => return Err(ConnectionError::SocketFailure(err)),
        };

        self.reader.push(&self.buffer[..n]);
        let mut frames = Vec::new();
        loop {
            match self.reader.next_frame() {
                Ok(Some(frame)) => {
                    self.stats.record_received(HEADER_LEN + frame.subject.len());
                    frames.push(frame);
                }
                Ok(None) => break,
                Err(err) if err.is_fatal() => return Err(ConnectionError::Protocol(err)),
                Err(err) => {
                    self.stats.record_dropped();
                    log::warn!("dropping inbound message: {}", err);
                }
            }
        }
        Ok(Inbound::Frames(frames))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn pair(config: &SyncConfig) -> (TcpStream, FrameSender, FrameReceiver, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (control, sender, receiver) =
            open(addr, config, Arc::new(StatsRecorder::default())).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (control, sender, receiver, peer)
    }

    #[test]
    fn test_send_writes_whole_frame() {
        let config = SyncConfig::default();
        let (_control, mut sender, _receiver, mut peer) = pair(&config);
        sender.send(MessageType::Connection, b"Glue;").unwrap();

        let mut received = [0u8; 29];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"1.9.1CONN000000000000005Glue;");
        assert_eq!(sender.stats.snapshot().bytes_sent, 29);
    }

    #[test]
    fn test_receive_timeout_and_close() {
        let config = SyncConfig {
            retry_delay_ms: 20,
            ..Default::default()
        };
        let (_control, _sender, mut receiver, mut peer) = pair(&config);
        assert!(matches!(receiver.receive().unwrap(), Inbound::Frames(f) if f.is_empty()));

        let frame = Frame::build(config.protocol_version, MessageType::Connection, b"OpenSpace;");
        peer.write_all(&frame).unwrap();
        peer.write_all(&frame[..10]).unwrap();
        let mut frames = Vec::new();
        while frames.is_empty() {
            if let Inbound::Frames(batch) = receiver.receive().unwrap() {
                frames.extend(batch);
            }
        }
        assert_eq!(frames[0].subject, b"OpenSpace;");

        drop(peer);
        let err = loop {
            match receiver.receive() {
                Ok(Inbound::Frames(_)) => continue,
                Ok(Inbound::Closed) => panic!("half frame should not close cleanly"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, ConnectionError::Protocol(_)));
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let config = SyncConfig {
            retry_delay_ms: 20,
            ..Default::default()
        };
        let (_control, _sender, mut receiver, mut peer) = pair(&config);
        peer.write_all(b"0.0.1CONN000000000000000").unwrap();
        let err = loop {
            match receiver.receive() {
                Ok(_) => continue,
                Err(err) => break err,
            }
        };
        assert!(matches!(
            err,
            ConnectionError::Protocol(crate::net::ProtocolError::VersionMismatch { .. })
        ));
    }
}
