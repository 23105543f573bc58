use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SyncConfig;
use crate::entity::{Entity, EntityRegistry, PropertyFlags, SyncError, collect_updates};
use crate::event::{DisconnectReason, NoopObserver, SyncObserver};
use crate::lock;
use crate::source::DataSources;

use super::aggregator::Outbox;
use super::codec::encode_string;
use super::dispatch::{
    DispatchOutcome, Dispatcher, decode_connection_subject, decode_removal_subject,
};
use super::endpoint::{self, FrameReceiver, FrameSender, Inbound};
use super::protocol::{DEFAULT_PORT, Frame, MessageType, ProtocolError};
use super::stats::{NetworkStats, StatsRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    SendingData,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::SendingData)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::SendingData => "sending data",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid address {address:?}: {reason}")]
    AddressInvalid { address: String, reason: String },
    #[error("no handshake from peer after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },
    #[error("socket failure: {0}")]
    SocketFailure(#[from] io::Error),
    #[error("operation not allowed while {0}")]
    InvalidState(ConnectionState),
    #[error("protocol violation: {0}")]
    Protocol(ProtocolError),
    #[error("connect cancelled by disconnect")]
    Cancelled,
}

/// Parses `[tcp://]host[:port]`. The host is `localhost`, an IPv4 address or
/// a bracketed IPv6 address; a missing port means 4700.
pub fn parse_address(address: &str) -> Result<SocketAddr, ConnectionError> {
    let invalid = |reason: &str| ConnectionError::AddressInvalid {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = address.trim();
    let rest = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);
    if rest.is_empty() {
        return Err(invalid("empty address"));
    }

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("missing ']'"))?;
        let port = match tail {
            "" => "",
            tail => tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("expected ':' after ']'"))?,
        };
        (host, port)
    } else {
        match rest.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => {
                return Err(invalid("IPv6 hosts must be bracketed"));
            }
            Some((host, port)) => (host, port),
            None => (rest, ""),
        }
    };

    let port = match port {
        "" => DEFAULT_PORT,
        port => match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(invalid("port must be 1-65535")),
            Ok(port) => port,
        },
    };

    let ip = if host.eq_ignore_ascii_case("localhost") {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        host.parse::<IpAddr>()
            .map_err(|_| invalid("host must be localhost or an IP address"))?
    };

    Ok(SocketAddr::new(ip, port))
}

/// One socket instance. Teardown runs once per link.
struct Link {
    running: AtomicBool,
    lost_connection: AtomicBool,
    closed: AtomicBool,
    control: TcpStream,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Link {
    fn new(control: TcpStream) -> Self {
        Self {
            running: AtomicBool::new(true),
            lost_connection: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            control,
            threads: Mutex::new(Vec::new()),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

struct Shared {
    config: SyncConfig,
    entities: EntityRegistry,
    outbox: Outbox,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    observer: Arc<dyn SyncObserver>,
    sources: DataSources,
    link: Mutex<Option<Arc<Link>>>,
    /// Bumped by `disconnect` to cancel a `connect` that has not yet
    /// published its link. Only changed with `state` locked.
    connect_epoch: AtomicU64,
    last_error: Mutex<Option<ConnectionError>>,
    stats: Arc<StatsRecorder>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock::lock(&self.state)
    }

    fn changed(&self, old: ConnectionState, new: ConnectionState) {
        self.state_changed.notify_all();
        if old != new {
            log::debug!("connection {} -> {}", old, new);
            self.observer.on_connection_state_changed(old, new);
        }
    }

    fn set_state(&self, new: ConnectionState) {
        let old = std::mem::replace(&mut *lock::lock(&self.state), new);
        self.changed(old, new);
    }

    /// Moves `Disconnected` to `Connecting` and returns the epoch the
    /// attempt belongs to.
    fn begin_connect(&self) -> Result<u64, ConnectionState> {
        let epoch = {
            let mut state = lock::lock(&self.state);
            if *state != ConnectionState::Disconnected {
                return Err(*state);
            }
            *state = ConnectionState::Connecting;
            self.connect_epoch.load(Ordering::Acquire)
        };
        self.changed(ConnectionState::Disconnected, ConnectionState::Connecting);
        Ok(epoch)
    }

    /// Returns a failed attempt to `Disconnected` unless it was cancelled,
    /// in which case the state already moved on.
    fn abandon_connect(&self, epoch: u64) {
        {
            let mut state = lock::lock(&self.state);
            if self.connect_epoch.load(Ordering::Acquire) != epoch
                || *state != ConnectionState::Connecting
            {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        self.changed(ConnectionState::Connecting, ConnectionState::Disconnected);
    }

    /// Publishes `link` unless the attempt was cancelled meanwhile.
    fn publish_link(&self, epoch: u64, link: &Arc<Link>) -> bool {
        let _state = lock::lock(&self.state);
        if self.connect_epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        *lock::lock(&self.link) = Some(Arc::clone(link));
        true
    }

    fn is_cancelled(&self, epoch: u64) -> bool {
        let _state = lock::lock(&self.state);
        self.connect_epoch.load(Ordering::Acquire) != epoch
    }

    /// Cancels a `connect` still opening its socket. Returns the current
    /// link instead when there is one.
    fn cancel_connect(&self) -> Option<Arc<Link>> {
        {
            let mut state = lock::lock(&self.state);
            let link = lock::lock(&self.link).clone();
            if link.is_some() || *state != ConnectionState::Connecting {
                return link;
            }
            self.connect_epoch.fetch_add(1, Ordering::AcqRel);
            *state = ConnectionState::Disconnected;
        }
        self.changed(ConnectionState::Connecting, ConnectionState::Disconnected);
        log::info!("disconnected: connect cancelled");
        None
    }

    /// Moves `from` to `to` only while `link` is the live link, so a thread
    /// of a torn-down link never touches its successor's state.
    fn link_transition(
        &self,
        link: &Arc<Link>,
        from: ConnectionState,
        to: ConnectionState,
    ) -> bool {
        {
            let mut state = lock::lock(&self.state);
            let current = lock::lock(&self.link)
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, link));
            if !current || !link.is_running() || *state != from {
                return false;
            }
            *state = to;
        }
        self.changed(from, to);
        true
    }

    fn report_error(&self, err: ConnectionError) {
        log::error!("connection error: {}", err);
        self.observer.on_connection_error(&err);
        *lock::lock(&self.last_error) = Some(err);
    }

    /// Queues the flagged groups of `entity`. An entity that has not yet sent
    /// its initial data always queues every group.
    fn queue_changes(&self, entity: &Entity, flags: PropertyFlags) -> Result<(), SyncError> {
        let flags = if entity.has_sent_initial_data() {
            flags
        } else {
            PropertyFlags::all()
        };
        let state = entity.state();
        let updates = collect_updates(entity.id(), &state, flags, &self.sources)?;
        if updates.is_empty() {
            return Ok(());
        }

        {
            let mut outbox = self.outbox.lock();
            for (key, value) in &updates {
                outbox.add_value(entity.id(), *key, value);
            }
        }
        self.outbox.notify();
        Ok(())
    }

    fn property_changed(&self, entity_id: &str, flags: PropertyFlags) -> Result<(), SyncError> {
        let entity = self
            .entities
            .get(entity_id)
            .ok_or_else(|| SyncError::UnknownEntity(entity_id.to_string()))?;
        if entity.is_suppressing_echo() {
            log::trace!("suppressed echo for {}", entity_id);
            return Ok(());
        }
        if !self.state().is_connected() {
            return Ok(());
        }
        self.queue_changes(&entity, flags)
    }

    fn resync_all(&self) {
        for entity in self.entities.snapshot() {
            entity.reset_initial_data();
            if let Err(err) = self.queue_changes(&entity, PropertyFlags::all()) {
                log::warn!("initial sync of {} failed: {}", entity.id(), err);
            }
        }
    }

    fn teardown(&self, link: &Arc<Link>, reason: DisconnectReason) {
        if link.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        link.running.store(false, Ordering::Release);
        self.outbox.notify();
        endpoint::shutdown(&link.control);

        self.outbox.lock().clear();
        self.entities.reset_initial_data_all();
        {
            let mut slot = lock::lock(&self.link);
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, link)) {
                *slot = None;
            }
        }
        self.set_state(ConnectionState::Disconnected);

        if reason.is_error() {
            log::warn!("disconnected: {}", reason.as_str());
        } else {
            log::info!("disconnected: {}", reason.as_str());
        }
    }
}

/// Handle for calling back into a connection without keeping it alive.
/// Observers hold this instead of the `Connection`.
#[derive(Clone)]
pub struct Notifier {
    shared: Weak<Shared>,
}

impl Notifier {
    pub fn on_entity_property_changed(
        &self,
        entity_id: &str,
        flags: PropertyFlags,
    ) -> Result<(), SyncError> {
        match self.shared.upgrade() {
            Some(shared) => shared.property_changed(entity_id, flags),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// Client side of a SIMP link to a visualization engine.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(config: SyncConfig, sources: DataSources) -> Self {
        Self::with_observer(config, sources, Arc::new(NoopObserver))
    }

    pub fn with_observer(
        config: SyncConfig,
        sources: DataSources,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                entities: EntityRegistry::new(),
                outbox: Outbox::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                state_changed: Condvar::new(),
                observer,
                sources,
                link: Mutex::new(None),
                connect_epoch: AtomicU64::new(0),
                last_error: Mutex::new(None),
                stats: Arc::new(StatsRecorder::default()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.stats.snapshot()
    }

    pub fn take_last_error(&self) -> Option<ConnectionError> {
        lock::lock(&self.shared.last_error).take()
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Connects to the configured address.
    pub fn connect_default(&self) -> Result<(), ConnectionError> {
        let address = self.shared.config.address.clone();
        self.connect(&address)
    }

    /// Opens the socket, sends `CONN` and starts the receive thread. The
    /// handshake completes in the background; see `wait_for_state`. A
    /// `disconnect` from another thread while the socket is still opening
    /// makes this return `Cancelled`.
    pub fn connect(&self, address: &str) -> Result<(), ConnectionError> {
        let addr = parse_address(address)?;
        let shared = &self.shared;
        let epoch = shared.begin_connect().map_err(ConnectionError::InvalidState)?;
        log::info!(
            "connecting to {} (handshake budget {:?})",
            addr,
            shared.config.handshake_budget()
        );

        let (control, mut sender, receiver) =
            match endpoint::open(addr, &shared.config, Arc::clone(&shared.stats)) {
                Ok(parts) => parts,
                Err(err) => {
                    log::warn!("connect to {} failed: {}", addr, err);
                    shared.abandon_connect(epoch);
                    return Err(ConnectionError::SocketFailure(err));
                }
            };
        if shared.is_cancelled(epoch) {
            log::debug!("connect to {} cancelled before CONN", addr);
            endpoint::shutdown(&control);
            return Err(ConnectionError::Cancelled);
        }

        let subject = encode_string(&shared.config.client_name);
        if let Err(err) = sender.send(MessageType::Connection, &subject) {
            endpoint::shutdown(&control);
            shared.abandon_connect(epoch);
            return Err(ConnectionError::SocketFailure(err));
        }

        let link = Arc::new(Link::new(control));
        if !shared.publish_link(epoch, &link) {
            log::debug!("connect to {} cancelled after CONN", addr);
            endpoint::shutdown(&link.control);
            return Err(ConnectionError::Cancelled);
        }

        let spawned = {
            let shared = Arc::clone(shared);
            let link = Arc::clone(&link);
            thread::Builder::new()
                .name("simp-recv".to_string())
                .spawn(move || receive_loop(shared, link, receiver, sender))
        };
        match spawned {
            Ok(handle) => {
                lock::lock(&link.threads).push(handle);
                Ok(())
            }
            Err(err) => {
                shared.teardown(&link, DisconnectReason::SocketError);
                Err(ConnectionError::SocketFailure(err))
            }
        }
    }

    /// Stops both loops and closes the socket. Safe to call repeatedly, from
    /// any state and from any thread.
    pub fn disconnect(&self) {
        let Some(link) = self.shared.cancel_connect() else {
            log::debug!("disconnect while {}", self.state());
            return;
        };
        self.shared.teardown(&link, DisconnectReason::Requested);

        let handles = std::mem::take(&mut *lock::lock(&link.threads));
        let current = thread::current().id();
        if handles.iter().any(|handle| handle.thread().id() == current) {
            // called from a connection thread; the loops exit on their own
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                log::error!("connection thread panicked");
            }
        }
    }

    /// Blocks until `predicate` holds for the state or `timeout` elapses.
    pub fn wait_for_state<F>(&self, mut predicate: F, timeout: Duration) -> Option<ConnectionState>
    where
        F: FnMut(ConnectionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = lock::lock(&self.shared.state);
        loop {
            if predicate(*state) {
                return Some(*state);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = match self.shared.state_changed.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => lock::recover(poisoned).0,
            };
        }
    }

    /// Registers an entity. While connected its full state is queued at once.
    pub fn add_entity(&self, entity: Arc<Entity>) -> Result<(), SyncError> {
        entity.reset_initial_data();
        if let Some(replaced) = self.shared.entities.insert(Arc::clone(&entity)) {
            log::debug!("replaced entity {}", replaced.id());
            self.shared.outbox.lock().discard(replaced.id());
        }
        if self.state().is_connected() {
            self.shared.queue_changes(&entity, PropertyFlags::all())?;
        }
        Ok(())
    }

    /// Unregisters an entity and, while connected, queues `RSGN` for it.
    pub fn remove_entity(&self, entity_id: &str) -> Option<Arc<Entity>> {
        let removed = self.shared.entities.remove(entity_id)?;
        {
            let mut outbox = self.shared.outbox.lock();
            if self.state().is_connected() {
                outbox.queue_removal(entity_id);
            } else {
                outbox.discard(entity_id);
            }
        }
        self.shared.outbox.notify();
        Some(removed)
    }

    pub fn entity(&self, entity_id: &str) -> Option<Arc<Entity>> {
        self.shared.entities.get(entity_id)
    }

    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.shared.entities.snapshot()
    }

    /// Reports a local change. Ignored while the entity is applying a remote
    /// update or while not connected.
    pub fn on_entity_property_changed(
        &self,
        entity_id: &str,
        flags: PropertyFlags,
    ) -> Result<(), SyncError> {
        self.shared.property_changed(entity_id, flags)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("address", &self.shared.config.address)
            .finish_non_exhaustive()
    }
}

fn receive_loop(
    shared: Arc<Shared>,
    link: Arc<Link>,
    mut receiver: FrameReceiver,
    sender: FrameSender,
) {
    let mut sender = Some(sender);
    let retries = shared.config.handshake_retries.max(1);
    let mut attempts = 0u32;

    let reason = 'poll: loop {
        if !link.is_running() {
            break DisconnectReason::Requested;
        }

        let received = receiver.receive();
        if link.lost_connection.load(Ordering::Acquire) {
            break DisconnectReason::LostConnection;
        }
        let frames = match received {
            Ok(Inbound::Frames(frames)) => frames,
            Ok(Inbound::Closed) if link.is_running() => break DisconnectReason::PeerClosed,
            Ok(Inbound::Closed) => break DisconnectReason::Requested,
            Err(err) => {
                if !link.is_running() {
                    break DisconnectReason::Requested;
                }
                let reason = match err {
                    ConnectionError::Protocol(_) => DisconnectReason::ProtocolViolation,
                    _ => DisconnectReason::SocketError,
                };
                shared.report_error(err);
                break reason;
            }
        };

        for frame in frames {
            if handle_frame(&shared, &link, &mut receiver, &mut sender, frame).is_break() {
                break 'poll DisconnectReason::PeerClosed;
            }
        }

        if shared.state() == ConnectionState::Connecting {
            attempts += 1;
            log::trace!("handshake attempt {}/{}", attempts, retries);
            if attempts >= retries {
                shared.report_error(ConnectionError::HandshakeTimeout { attempts });
                break DisconnectReason::HandshakeTimeout;
            }
        }
    };

    shared.teardown(&link, reason);
}

fn handle_frame(
    shared: &Arc<Shared>,
    link: &Arc<Link>,
    receiver: &mut FrameReceiver,
    sender: &mut Option<FrameSender>,
    frame: Frame,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    let state = shared.state();
    match frame.message_type {
        MessageType::Connection if state == ConnectionState::Connecting => {
            let peer = match decode_connection_subject(&frame.subject) {
                Ok(peer) => peer,
                Err(err) => {
                    log::warn!("malformed CONN subject, peer name unknown: {}", err);
                    String::new()
                }
            };
            complete_handshake(shared, link, receiver, sender, &peer);
        }
        MessageType::Connection => log::debug!("ignoring CONN while {}", state),
        MessageType::Disconnection => {
            log::info!("peer sent DISC");
            return ControlFlow::Break(());
        }
        _ if !state.is_connected() => {
            log::debug!("ignoring {} before handshake", frame.message_type);
        }
        MessageType::Data => {
            let dispatcher = Dispatcher::new(&shared.entities, shared.observer.as_ref());
            match dispatcher.dispatch_data(&frame.subject) {
                Ok(DispatchOutcome::Applied { entity_id, applied, .. }) => {
                    log::trace!("applied {} values to {}", applied, entity_id);
                }
                Ok(DispatchOutcome::UnknownEntity(_)) => {}
                Err(err) => {
                    shared.stats.record_dropped();
                    log::warn!("dropping DATA message: {}", err);
                }
            }
        }
        MessageType::RemoveSceneGraphNode => match decode_removal_subject(&frame.subject) {
            Ok(entity_id) => log::debug!("peer removed {}, ignoring", entity_id),
            Err(err) => log::warn!("dropping RSGN message: {}", err),
        },
    }
    ControlFlow::Continue(())
}

fn complete_handshake(
    shared: &Arc<Shared>,
    link: &Arc<Link>,
    receiver: &mut FrameReceiver,
    sender: &mut Option<FrameSender>,
    peer: &str,
) {
    if !shared.link_transition(link, ConnectionState::Connecting, ConnectionState::Connected) {
        return;
    }
    log::info!("handshake complete with {:?}", peer);

    if let Err(err) = receiver.set_read_timeout(shared.config.read_timeout()) {
        log::warn!("failed to set read timeout: {}", err);
    }
    shared.resync_all();

    let Some(sender) = sender.take() else {
        return;
    };
    let spawned = {
        let shared = Arc::clone(shared);
        let link = Arc::clone(link);
        thread::Builder::new()
            .name("simp-send".to_string())
            .spawn(move || send_loop(shared, link, sender))
    };
    match spawned {
        Ok(handle) => lock::lock(&link.threads).push(handle),
        Err(err) => {
            shared.report_error(ConnectionError::SocketFailure(err));
            link.lost_connection.store(true, Ordering::Release);
        }
    }
}

fn send_loop(shared: Arc<Shared>, link: Arc<Link>, mut sender: FrameSender) {
    let idle = shared.config.read_timeout();

    loop {
        let (removals, subjects) = {
            let Some(mut outbox) = shared.outbox.wait_for_work(&link.running, idle) else {
                break;
            };
            let removals = outbox.drain_removals();
            let subjects =
                outbox.drain_and_build_subjects(|id| shared.entities.display_name_of(id));
            (removals, subjects)
        };

        shared.link_transition(&link, ConnectionState::Connected, ConnectionState::SendingData);
        let result = flush(&shared, &mut sender, &removals, &subjects);
        shared.link_transition(&link, ConnectionState::SendingData, ConnectionState::Connected);

        if let Err(err) = result {
            if link.is_running() {
                shared.report_error(ConnectionError::SocketFailure(err));
                link.lost_connection.store(true, Ordering::Release);
                endpoint::shutdown(&link.control);
            }
            break;
        }
    }
    log::debug!("send loop stopped");
}

fn flush(
    shared: &Shared,
    sender: &mut FrameSender,
    removals: &[Vec<u8>],
    subjects: &[(String, Vec<u8>)],
) -> io::Result<()> {
    for subject in removals {
        sender.send(MessageType::RemoveSceneGraphNode, subject)?;
    }
    for (entity_id, subject) in subjects {
        sender.send(MessageType::Data, subject)?;
        if let Some(entity) = shared.entities.get(entity_id) {
            entity.mark_initial_data_sent();
        }
    }
    Ok(())
}
