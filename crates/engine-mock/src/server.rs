use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use simp::AttributeKey;
use simp::net::codec::encode_string;
use simp::net::dispatch::{decode_connection_subject, decode_removal_subject};
use simp::net::{
    DEFAULT_MAX_SUBJECT_LEN, DataMessage, Frame, FrameReader, MessageType, PROTOCOL_VERSION,
    decode_data_subject, encode_data_subject,
};

use crate::config::EngineConfig;
use crate::events::{DisconnectReason, EngineEvent};

const READ_CHUNK: usize = 16 * 1024;

struct Client {
    client_id: u32,
    addr: SocketAddr,
    stream: TcpStream,
    reader: FrameReader,
    handshake_done: bool,
    /// Entity id to display name for every entity the client has described.
    entities: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub client_count: usize,
    pub entity_count: usize,
    pub frames_received: u64,
    pub frames_sent: u64,
}

/// Single threaded stand-in for the visualization engine. Every tick
/// accepts new sockets and drains whatever the clients have sent.
pub struct EngineServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: EngineConfig,
    clients: Vec<Client>,
    next_client_id: u32,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<EngineEvent>,
    stats: EngineStats,
}

impl EngineServer {
    pub fn new(bind_addr: &str, config: EngineConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            config,
            clients: Vec::new(),
            next_client_id: 1,
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            stats: EngineStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Ticks until the running flag is cleared, then says goodbye to every
    /// client.
    pub fn run<F>(&mut self, mut on_event: F)
    where
        F: FnMut(EngineEvent),
    {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.pending_events.drain(..) {
                on_event(event);
            }
            thread::sleep(self.config.poll_interval);
        }
        self.shutdown_connections();
        for event in self.pending_events.drain(..) {
            on_event(event);
        }
    }

    pub fn tick_once(&mut self) {
        self.accept_clients();

        for index in (0..self.clients.len()).rev() {
            let client = &mut self.clients[index];
            let Some(reason) = poll_client(
                client,
                &self.config,
                &mut self.pending_events,
                &mut self.stats,
            ) else {
                continue;
            };
            let client = self.clients.swap_remove(index);
            let _ = client.stream.shutdown(Shutdown::Both);
            self.pending_events.push_back(EngineEvent::ClientDisconnected {
                client_id: client.client_id,
                reason,
            });
        }
    }

    fn accept_clients(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) => {
                    self.pending_events.push_back(EngineEvent::Error {
                        message: format!("Accept failed: {}", err),
                    });
                    return;
                }
            };

            if self.clients.len() >= self.config.max_clients {
                let _ = stream.shutdown(Shutdown::Both);
                self.pending_events.push_back(EngineEvent::ConnectionDenied {
                    addr,
                    reason: format!("server full ({} clients)", self.config.max_clients),
                });
                continue;
            }

            if let Err(err) = stream
                .set_nonblocking(true)
                .and_then(|_| stream.set_nodelay(true))
            {
                self.pending_events.push_back(EngineEvent::Error {
                    message: format!("Failed to configure socket from {}: {}", addr, err),
                });
                continue;
            }

            let client_id = self.next_client_id;
            self.next_client_id += 1;
            log::debug!("client {} opened a socket from {}", client_id, addr);
            self.clients.push(Client {
                client_id,
                addr,
                stream,
                reader: FrameReader::new(PROTOCOL_VERSION, DEFAULT_MAX_SUBJECT_LEN),
                handshake_done: false,
                entities: HashMap::new(),
            });
        }
    }

    pub fn kick_client(&mut self, client_id: u32) {
        let Some(index) = self.clients.iter().position(|c| c.client_id == client_id) else {
            return;
        };
        let mut client = self.clients.swap_remove(index);
        if write_frame(&mut client.stream, MessageType::Disconnection, b"").is_ok() {
            self.stats.frames_sent += 1;
        }
        let _ = client.stream.shutdown(Shutdown::Both);
        self.pending_events.push_back(EngineEvent::ClientDisconnected {
            client_id,
            reason: DisconnectReason::Kicked,
        });
    }

    pub fn shutdown_connections(&mut self) {
        let client_ids: Vec<u32> = self.clients.iter().map(|c| c.client_id).collect();
        for client_id in client_ids {
            self.kick_client(client_id);
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            client_count: self.clients.len(),
            entity_count: self.clients.iter().map(|c| c.entities.len()).sum(),
            ..self.stats
        }
    }
}

fn poll_client(
    client: &mut Client,
    config: &EngineConfig,
    events: &mut VecDeque<EngineEvent>,
    stats: &mut EngineStats,
) -> Option<DisconnectReason> {
    let mut buffer = [0u8; READ_CHUNK];
    let mut closed = false;
    loop {
        match client.stream.read(&mut buffer) {
            Ok(0) => {
                closed = true;
                break;
            }
            Ok(n) => client.reader.push(&buffer[..n]),
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                events.push_back(EngineEvent::Error {
                    message: format!("Read from client {} failed: {}", client.client_id, err),
                });
                closed = true;
                break;
            }
        }
    }

    loop {
        match client.reader.next_frame() {
            Ok(Some(frame)) => {
                stats.frames_received += 1;
                if let Some(reason) = handle_frame(client, frame, config, events, stats) {
                    return Some(reason);
                }
            }
            Ok(None) => break,
            Err(err) if err.is_fatal() => {
                events.push_back(EngineEvent::Error {
                    message: format!("Client {}: {}", client.client_id, err),
                });
                return Some(DisconnectReason::ProtocolError);
            }
            Err(err) => log::warn!("client {}: skipping message: {}", client.client_id, err),
        }
    }

    closed.then_some(DisconnectReason::Closed)
}

fn handle_frame(
    client: &mut Client,
    frame: Frame,
    config: &EngineConfig,
    events: &mut VecDeque<EngineEvent>,
    stats: &mut EngineStats,
) -> Option<DisconnectReason> {
    match frame.message_type {
        MessageType::Connection => {
            if !config.answer_handshake {
                log::debug!("client {}: leaving CONN unanswered", client.client_id);
                return None;
            }
            if client.handshake_done {
                log::debug!("client {}: repeated CONN", client.client_id);
                return None;
            }
            let software = match decode_connection_subject(&frame.subject) {
                Ok(software) => software,
                Err(err) => {
                    log::warn!("client {}: malformed CONN subject: {}", client.client_id, err);
                    String::new()
                }
            };
            let reply = encode_string(&config.software_name);
            if let Err(err) = write_frame(&mut client.stream, MessageType::Connection, &reply) {
                return Some(write_failed(client, err, events));
            }
            stats.frames_sent += 1;
            client.handshake_done = true;
            events.push_back(EngineEvent::ClientConnected {
                client_id: client.client_id,
                addr: client.addr,
                software,
            });
        }
        MessageType::Disconnection => return Some(DisconnectReason::Graceful),
        _ if !client.handshake_done => {
            log::debug!(
                "client {}: {} before handshake",
                client.client_id,
                frame.message_type
            );
        }
        MessageType::Data => {
            let message = match decode_data_subject(&frame.subject) {
                Ok(message) => message,
                Err(err) => {
                    log::warn!("client {}: bad DATA: {}", client.client_id, err);
                    return None;
                }
            };

            client
                .entities
                .insert(message.entity_id.clone(), message.display_name.clone());
            if config.echo_visibility {
                if let Some(reason) = echo_visibility(client, &message, events, stats) {
                    return Some(reason);
                }
            }
            events.push_back(EngineEvent::EntityUpdated {
                client_id: client.client_id,
                keys: message
                    .attributes
                    .iter()
                    .map(|(key, _)| key.as_str().to_string())
                    .collect(),
                entity_id: message.entity_id,
                display_name: message.display_name,
            });
        }
        MessageType::RemoveSceneGraphNode => match decode_removal_subject(&frame.subject) {
            Ok(entity_id) => {
                client.entities.remove(&entity_id);
                events.push_back(EngineEvent::EntityRemoved {
                    client_id: client.client_id,
                    entity_id,
                });
            }
            Err(err) => log::warn!("client {}: bad RSGN: {}", client.client_id, err),
        },
    }
    None
}

/// Sends the received visibility back, the way the engine reports a
/// toggle made in its own UI.
fn echo_visibility(
    client: &mut Client,
    message: &DataMessage,
    events: &mut VecDeque<EngineEvent>,
    stats: &mut EngineStats,
) -> Option<DisconnectReason> {
    let visibility = message
        .attributes
        .iter()
        .find(|(key, _)| *key == AttributeKey::Visibility)?;
    let echo = DataMessage {
        entity_id: message.entity_id.clone(),
        display_name: message.display_name.clone(),
        attributes: vec![visibility.clone()],
    };
    match write_frame(&mut client.stream, MessageType::Data, &encode_data_subject(&echo)) {
        Ok(()) => {
            stats.frames_sent += 1;
            None
        }
        Err(err) => Some(write_failed(client, err, events)),
    }
}

fn write_failed(
    client: &Client,
    err: io::Error,
    events: &mut VecDeque<EngineEvent>,
) -> DisconnectReason {
    events.push_back(EngineEvent::Error {
        message: format!("Write to client {} failed: {}", client.client_id, err),
    });
    DisconnectReason::Closed
}

fn write_frame(
    stream: &mut TcpStream,
    message_type: MessageType,
    subject: &[u8],
) -> io::Result<()> {
    let data = Frame::build(PROTOCOL_VERSION, message_type, subject);
    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "socket closed during write",
                ));
            }
            Ok(n) => written += n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                thread::sleep(Duration::from_millis(1));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};
    use std::thread::JoinHandle;

    use simp::source::memory::{AxisTransform, InMemoryStore, LinearColormap};
    use simp::{
        AttributeValue, Color, Connection, ConnectionError, ConnectionState, DataSources, Entity,
        EntityState, EventRecorder, SyncConfig, SyncEvent, SyncObserver,
    };

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(3);

    struct Running {
        address: String,
        running: Arc<AtomicBool>,
        events: Receiver<EngineEvent>,
        handle: JoinHandle<()>,
    }

    impl Running {
        fn stop(self) {
            self.running.store(false, Ordering::SeqCst);
            self.handle.join().unwrap();
        }

        fn next_matching(&self, mut predicate: impl FnMut(&EngineEvent) -> bool) -> EngineEvent {
            loop {
                let event = self.events.recv_timeout(TIMEOUT).unwrap();
                if predicate(&event) {
                    return event;
                }
            }
        }
    }

    fn start(config: EngineConfig) -> Running {
        let mut server = EngineServer::new("127.0.0.1:0", config).unwrap();
        let address = server.local_addr().to_string();
        let running = server.running();
        let (tx, events) = mpsc::channel();
        let handle = thread::spawn(move || {
            server.run(|event| {
                let _ = tx.send(event);
            })
        });
        Running {
            address,
            running,
            events,
            handle,
        }
    }

    fn sources() -> DataSources {
        DataSources::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(AxisTransform),
            Arc::new(LinearColormap::new(Color::ZERO, Color::ONE)),
        )
    }

    fn client_config(address: &str) -> SyncConfig {
        SyncConfig {
            address: address.to_string(),
            retry_delay_ms: 20,
            read_timeout_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_client_session() {
        let engine = start(EngineConfig::default());
        let conn = Connection::new(client_config(&engine.address), sources());
        conn.add_entity(Arc::new(Entity::new("e1", "Stars", EntityState::default())))
            .unwrap();

        conn.connect_default().unwrap();
        assert!(conn.wait_for_state(|s| s.is_connected(), TIMEOUT).is_some());

        match engine.next_matching(|e| matches!(e, EngineEvent::ClientConnected { .. })) {
            EngineEvent::ClientConnected { software, .. } => assert_eq!(software, "Glue"),
            other => panic!("Expected ClientConnected, got {:?}", other),
        }
        match engine.next_matching(|e| matches!(e, EngineEvent::EntityUpdated { .. })) {
            EngineEvent::EntityUpdated {
                entity_id,
                display_name,
                keys,
                ..
            } => {
                assert_eq!(entity_id, "e1");
                assert_eq!(display_name, "Stars");
                assert!(keys.iter().any(|k| k == "vis.val"));
            }
            other => panic!("Expected EntityUpdated, got {:?}", other),
        }

        conn.remove_entity("e1").unwrap();
        match engine.next_matching(|e| matches!(e, EngineEvent::EntityRemoved { .. })) {
            EngineEvent::EntityRemoved { entity_id, .. } => assert_eq!(entity_id, "e1"),
            other => panic!("Expected EntityRemoved, got {:?}", other),
        }

        conn.disconnect();
        match engine.next_matching(|e| matches!(e, EngineEvent::ClientDisconnected { .. })) {
            EngineEvent::ClientDisconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::Closed)
            }
            other => panic!("Expected ClientDisconnected, got {:?}", other),
        }
        engine.stop();
    }

    #[test]
    fn test_echoed_visibility_is_applied() {
        let engine = start(EngineConfig {
            echo_visibility: true,
            ..Default::default()
        });
        let recorder = Arc::new(EventRecorder::default());
        let conn = Connection::with_observer(
            client_config(&engine.address),
            sources(),
            Arc::clone(&recorder) as Arc<dyn SyncObserver>,
        );
        conn.add_entity(Arc::new(Entity::new("e1", "Stars", EntityState::default())))
            .unwrap();
        conn.connect_default().unwrap();

        let mut seen = Vec::new();
        let deadline = std::time::Instant::now() + TIMEOUT;
        while std::time::Instant::now() < deadline {
            seen.extend(recorder.drain());
            if seen.iter().any(|e| matches!(e, SyncEvent::RemoteUpdate { .. })) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(seen.contains(&SyncEvent::RemoteUpdate {
            entity_id: "e1".to_string(),
            key: AttributeKey::Visibility,
            value: AttributeValue::Bool(true),
        }));
        engine.stop();
        assert!(conn
            .wait_for_state(|s| s == ConnectionState::Disconnected, TIMEOUT)
            .is_some());
    }

    #[test]
    fn test_silent_engine_times_out_handshake() {
        let engine = start(EngineConfig {
            answer_handshake: false,
            ..Default::default()
        });
        let config = SyncConfig {
            handshake_retries: 2,
            ..client_config(&engine.address)
        };
        let conn = Connection::new(config, sources());
        conn.connect_default().unwrap();

        assert!(conn
            .wait_for_state(|s| s == ConnectionState::Disconnected, TIMEOUT)
            .is_some());
        assert!(matches!(
            conn.take_last_error(),
            Some(ConnectionError::HandshakeTimeout { attempts: 2 })
        ));
        engine.stop();
    }

    #[test]
    fn test_malformed_conn_subject_is_answered() {
        let engine = start(EngineConfig::default());
        let mut stream = TcpStream::connect(&engine.address).unwrap();
        write_frame(&mut stream, MessageType::Connection, b"Glue").unwrap();

        match engine.next_matching(|e| matches!(e, EngineEvent::ClientConnected { .. })) {
            EngineEvent::ClientConnected { software, .. } => assert!(software.is_empty()),
            other => panic!("Expected ClientConnected, got {:?}", other),
        }
        engine.stop();
    }

    #[test]
    fn test_full_server_denies() {
        let engine = start(EngineConfig {
            max_clients: 0,
            ..Default::default()
        });
        let _stream = TcpStream::connect(&engine.address).unwrap();
        assert!(matches!(
            engine.next_matching(|e| matches!(e, EngineEvent::ConnectionDenied { .. })),
            EngineEvent::ConnectionDenied { .. }
        ));
        engine.stop();
    }
}
