pub mod control;
pub mod devices;
pub mod doctor;
pub mod manager;
pub mod rfcomm;
pub mod status;
pub mod transport;

use serde::Deserialize;
use std::time::Duration;

pub use control::{ControlInputs, ControlState};
pub use devices::{DeviceRegistry, PairedDevice};
pub use manager::{LinkClosed, LinkManager};
pub use rfcomm::{RfcommConnector, StreamSession};
pub use status::{LinkStats, LinkStatus};
pub use transport::{ConnectError, Connector, DeviceId, IoError, Session, SPP_SERVICE_UUID};

/// `[link]` section. Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinkPolicy {
    /// Command cadence. The firmware expects a line every 100 ms.
    pub write_interval_ms: u64,

    /// Pause after a failed read/write before probing liveness and retrying.
    pub retry_delay_ms: u64,

    /// Same-tick retries of a failed read/write before the session is declared dead.
    pub max_io_retries: u32,

    /// Unset: wait for the transport however long the handshake takes.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            write_interval_ms: 100,
            retry_delay_ms: 1000,
            max_io_retries: 1,
            connect_timeout_ms: None,
        }
    }
}

impl LinkPolicy {
    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
