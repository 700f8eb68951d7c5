use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::transport::{ConnectError, DeviceId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connecting(DeviceId),
    Connected(DeviceId),
    /// Last connect attempt failed. No session is alive.
    Failed(ConnectError),
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected(_))
    }

    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            LinkStatus::Connecting(d) | LinkStatus::Connected(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::Connecting(d) => write!(f, "connecting to {}", d),
            LinkStatus::Connected(d) => write!(f, "connected to {}", d),
            LinkStatus::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub lines_received: u64,
    pub telemetry_published: u64,
    pub malformed_dropped: u64,
    pub commands_written: u64,
    pub io_retries: u64,
    pub sessions_opened: u64,
    pub sessions_lost: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LinkCounters {
    pub lines_received: AtomicU64,
    pub telemetry_published: AtomicU64,
    pub malformed_dropped: AtomicU64,
    pub commands_written: AtomicU64,
    pub io_retries: AtomicU64,
    pub sessions_opened: AtomicU64,
    pub sessions_lost: AtomicU64,
}

impl LinkCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LinkStats {
            lines_received: get(&self.lines_received),
            telemetry_published: get(&self.telemetry_published),
            malformed_dropped: get(&self.malformed_dropped),
            commands_written: get(&self.commands_written),
            io_retries: get(&self.io_retries),
            sessions_opened: get(&self.sessions_opened),
            sessions_lost: get(&self.sessions_lost),
        }
    }
}
