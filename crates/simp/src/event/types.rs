use crate::attribute::{AttributeKey, AttributeValue};
use crate::net::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    Requested,
    PeerClosed,
    LostConnection,
    HandshakeTimeout,
    ProtocolViolation,
    SocketError,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::PeerClosed => "peer closed",
            Self::LostConnection => "lost connection",
            Self::HandshakeTimeout => "handshake timeout",
            Self::ProtocolViolation => "protocol violation",
            Self::SocketError => "socket error",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Requested | Self::PeerClosed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    RemoteUpdate {
        entity_id: String,
        key: AttributeKey,
        value: AttributeValue,
    },
    Error {
        message: String,
    },
}
