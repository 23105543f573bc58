use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::codec::CodecError;

pub const VERSION_WIDTH: usize = 5;
pub const TYPE_WIDTH: usize = 4;
pub const LENGTH_WIDTH: usize = 15;
pub const HEADER_LEN: usize = VERSION_WIDTH + TYPE_WIDTH + LENGTH_WIDTH;
pub const DEFAULT_PORT: u16 = 4700;
pub const DEFAULT_MAX_SUBJECT_LEN: usize = 512 * 1024 * 1024;
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::CURRENT;

/// A `major.minor.patch` triple of single digits, always five ASCII bytes
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    major: u8,
    minor: u8,
    patch: u8,
}

impl ProtocolVersion {
    pub const CURRENT: Self = Self {
        major: 1,
        minor: 9,
        patch: 1,
    };

    pub fn new(major: u8, minor: u8, patch: u8) -> Option<Self> {
        if major > 9 || minor > 9 || patch > 9 {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    pub fn patch(&self) -> u8 {
        self.patch
    }

    pub fn to_wire(&self) -> [u8; VERSION_WIDTH] {
        [
            b'0' + self.major,
            b'.',
            b'0' + self.minor,
            b'.',
            b'0' + self.patch,
        ]
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let digit = |b: u8| b.is_ascii_digit().then(|| b - b'0');
        match bytes {
            [major, b'.', minor, b'.', patch] => {
                match (digit(*major), digit(*minor), digit(*patch)) {
                    (Some(major), Some(minor), Some(patch)) => Ok(Self {
                        major,
                        minor,
                        patch,
                    }),
                    _ => Err(format!("invalid protocol version {s:?}")),
                }
            }
            _ => Err(format!("protocol version must look like 1.9.1, got {s:?}")),
        }
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(value: ProtocolVersion) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connection,
    Data,
    RemoveSceneGraphNode,
    Disconnection,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::Connection,
        MessageType::Data,
        MessageType::RemoveSceneGraphNode,
        MessageType::Disconnection,
    ];

    pub fn as_bytes(&self) -> &'static [u8; TYPE_WIDTH] {
        match self {
            MessageType::Connection => b"CONN",
            MessageType::Data => b"DATA",
            MessageType::RemoveSceneGraphNode => b"RSGN",
            MessageType::Disconnection => b"DISC",
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|message_type| message_type.as_bytes().as_slice() == raw)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol version mismatch: expected {expected}, peer sent {found:?}")]
    VersionMismatch {
        expected: ProtocolVersion,
        found: String,
    },
    #[error("truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("unknown attribute key {0:?}")]
    UnknownAttributeKey(String),
    #[error("unknown message type {raw:?}")]
    UnknownMessageType { raw: String, frame_len: usize },
    #[error("invalid subject length field {0:?}")]
    InvalidLength(String),
    #[error("subject of {len} bytes exceeds the {max} byte limit")]
    SubjectTooLarge { len: u64, max: usize },
    #[error("codec error: {0}")]
    Codec(CodecError),
}

impl ProtocolError {
    /// Errors after which the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::VersionMismatch { .. }
                | ProtocolError::InvalidLength(_)
                | ProtocolError::SubjectTooLarge { .. }
        )
    }
}

impl From<CodecError> for ProtocolError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Truncated {
                needed, available, ..
            } => ProtocolError::Truncated { needed, available },
            other => ProtocolError::Codec(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: ProtocolVersion,
    pub message_type: MessageType,
    pub subject: Vec<u8>,
}

impl Frame {
    pub fn new(version: ProtocolVersion, message_type: MessageType, subject: Vec<u8>) -> Self {
        Self {
            version,
            message_type,
            subject,
        }
    }

    pub fn build(version: ProtocolVersion, message_type: MessageType, subject: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + subject.len());
        data.extend_from_slice(&version.to_wire());
        data.extend_from_slice(message_type.as_bytes());
        let length = format!("{:0width$}", subject.len(), width = LENGTH_WIDTH);
        data.extend_from_slice(length.as_bytes());
        data.extend_from_slice(subject);
        data
    }

    /// Parses one frame from the front of `buffer`, returning it with the
    /// number of bytes it occupied.
    pub fn parse(
        buffer: &[u8],
        expected: ProtocolVersion,
        max_subject_len: usize,
    ) -> Result<(Frame, usize), ProtocolError> {
        if buffer.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                available: buffer.len(),
            });
        }

        let (version_field, rest) = buffer.split_at(VERSION_WIDTH);
        if version_field != expected.to_wire() {
            return Err(ProtocolError::VersionMismatch {
                expected,
                found: String::from_utf8_lossy(version_field).into_owned(),
            });
        }

        let (type_field, rest) = rest.split_at(TYPE_WIDTH);
        let (length_field, rest) = rest.split_at(LENGTH_WIDTH);

        if !length_field.iter().all(u8::is_ascii_digit) {
            return Err(ProtocolError::InvalidLength(
                String::from_utf8_lossy(length_field).into_owned(),
            ));
        }
        let subject_len = length_field
            .iter()
            .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0'));
        if subject_len > max_subject_len as u64 {
            return Err(ProtocolError::SubjectTooLarge {
                len: subject_len,
                max: max_subject_len,
            });
        }

        let subject_len = subject_len as usize;
        if rest.len() < subject_len {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN + subject_len,
                available: buffer.len(),
            });
        }
        let frame_len = HEADER_LEN + subject_len;

        let message_type = MessageType::from_bytes(type_field).ok_or_else(|| {
            ProtocolError::UnknownMessageType {
                raw: String::from_utf8_lossy(type_field).into_owned(),
                frame_len,
            }
        })?;

        let frame = Frame::new(expected, message_type, rest[..subject_len].to_vec());
        Ok((frame, frame_len))
    }
}

/// Reassembles frames from a byte stream that may split or concatenate them.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    version: ProtocolVersion,
    max_subject_len: usize,
}

impl FrameReader {
    pub fn new(version: ProtocolVersion, max_subject_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            version,
            max_subject_len,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `Ok(None)` when the buffered bytes do not yet hold a complete
    /// frame. An unknown message type is skipped before the error is returned.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match Frame::parse(&self.buffer, self.version, self.max_subject_len) {
            Ok((frame, consumed)) => {
                self.buffer.drain(..consumed);
                Ok(Some(frame))
            }
            Err(ProtocolError::Truncated { .. }) => Ok(None),
            Err(err @ ProtocolError::UnknownMessageType { frame_len, .. }) => {
                self.buffer.drain(..frame_len);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Checks the buffer once the peer has closed the stream. Leftover bytes
    /// are an incomplete frame.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        Frame::parse(&self.buffer, self.version, self.max_subject_len).map(|_| ())
    }
}
