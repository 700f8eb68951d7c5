use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serial port profile service record. The rover firmware only answers on this one.
pub const SPP_SERVICE_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("peer disconnected")]
    Disconnected,
}

/// Opens sessions to a device. Implementations may block for the whole
/// handshake; the link manager decides whether to bound it with a timeout.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    async fn connect(&self, device: &DeviceId) -> Result<Self::Session, ConnectError>;
}

/// One live connection to one rover. Shared by the read and write loops, so
/// every method takes `&self`; reads and writes must not block each other.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Next full line including its terminator. Waits without spinning.
    async fn read_line(&self) -> Result<String, IoError>;

    /// Writes the whole line and flushes.
    async fn write_line(&self, line: &str) -> Result<(), IoError>;

    /// Non-blocking liveness probe.
    fn is_alive(&self) -> bool;

    /// Idempotent. Pending reads/writes on this session return `Disconnected`.
    async fn close(&self);
}
