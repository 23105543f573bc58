use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    ClientConnected {
        client_id: u32,
        addr: SocketAddr,
        software: String,
    },
    ClientDisconnected {
        client_id: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    EntityUpdated {
        client_id: u32,
        entity_id: String,
        display_name: String,
        keys: Vec<String>,
    },
    EntityRemoved {
        client_id: u32,
        entity_id: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Closed,
    Kicked,
    ProtocolError,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Closed => "closed the socket",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::ProtocolError => "violated the protocol",
        }
    }
}
