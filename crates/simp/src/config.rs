use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_MAX_SUBJECT_LEN, ProtocolVersion};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Connection settings. Every field is optional in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// `host:port`, optionally prefixed with `tcp://`.
    pub address: String,
    /// Name announced in the `CONN` subject.
    pub client_name: String,
    pub protocol_version: ProtocolVersion,
    /// Handshake polls before giving up.
    pub handshake_retries: u32,
    pub retry_delay_ms: u64,
    pub send_retries: u32,
    pub read_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_subject_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            address: "localhost:4700".to_string(),
            client_name: "Glue".to_string(),
            protocol_version: ProtocolVersion::CURRENT,
            handshake_retries: 20,
            retry_delay_ms: 500,
            send_retries: 5,
            read_timeout_ms: 250,
            connect_timeout_ms: 5000,
            write_timeout_ms: 2000,
            max_subject_len: DEFAULT_MAX_SUBJECT_LEN,
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

impl SyncConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn retry_delay(&self) -> Duration {
        millis(self.retry_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        millis(self.write_timeout_ms)
    }

    /// Upper bound on the time spent waiting for the handshake.
    pub fn handshake_budget(&self) -> Duration {
        self.retry_delay() * self.handshake_retries.max(1)
    }
}
