#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rover_link::{ConnectError, Connector, DeviceId, IoError, LinkManager, LinkPolicy, LinkStatus, Session};
use rover_proto::TelemetryRecord;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub enum ReadStep {
    Line(String),
    Fail,
}

struct Shared {
    reads: AsyncMutex<mpsc::UnboundedReceiver<ReadStep>>,
    feed: Mutex<Option<mpsc::UnboundedSender<ReadStep>>>,
    attempts: Mutex<Vec<Instant>>,
    writes: Mutex<Vec<(Instant, String)>>,
    fail_writes: AtomicU32,
    write_delays: Mutex<VecDeque<Duration>>,
    alive: AtomicBool,
    closes: AtomicUsize,
    cancel: CancellationToken,
}

/// In-memory rover. Reads are fed by the test; writes are recorded.
#[derive(Clone)]
pub struct ScriptedSession(Arc<Shared>);

impl ScriptedSession {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self(Arc::new(Shared {
            reads: AsyncMutex::new(rx),
            feed: Mutex::new(Some(tx)),
            attempts: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicU32::new(0),
            write_delays: Mutex::new(VecDeque::new()),
            alive: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        }))
    }

    fn feed(&self, step: ReadStep) {
        if let Some(tx) = self.0.feed.lock().unwrap().as_ref() {
            let _ = tx.send(step);
        }
    }

    pub fn push_line(&self, line: &str) {
        self.feed(ReadStep::Line(line.to_string()));
    }

    pub fn push_read_failure(&self) {
        self.feed(ReadStep::Fail);
    }

    /// Peer goes away: pending and future reads see end of stream.
    pub fn hang_up(&self) {
        self.0.feed.lock().unwrap().take();
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.0.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Delays applied to upcoming write attempts, in order.
    pub fn delay_writes(&self, delays: &[Duration]) {
        self.0.write_delays.lock().unwrap().extend(delays.iter().copied());
    }

    pub fn write_attempts(&self) -> Vec<Instant> {
        self.0.attempts.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(Instant, String)> {
        self.0.writes.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.0.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn read_line(&self) -> Result<String, IoError> {
        if !self.is_alive() {
            return Err(IoError::Disconnected);
        }
        let mut rx = tokio::select! {
            _ = self.0.cancel.cancelled() => return Err(IoError::Disconnected),
            g = self.0.reads.lock() => g,
        };
        let step = tokio::select! {
            _ = self.0.cancel.cancelled() => return Err(IoError::Disconnected),
            s = rx.recv() => s,
        };
        match step {
            Some(ReadStep::Line(l)) => Ok(l),
            Some(ReadStep::Fail) => Err(IoError::Disconnected),
            None => {
                self.0.alive.store(false, Ordering::SeqCst);
                Err(IoError::Disconnected)
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), IoError> {
        if !self.is_alive() {
            return Err(IoError::Disconnected);
        }
        self.0.attempts.lock().unwrap().push(Instant::now());
        let delay = self.0.write_delays.lock().unwrap().pop_front();
        if let Some(d) = delay {
            tokio::select! {
                _ = self.0.cancel.cancelled() => return Err(IoError::Disconnected),
                _ = tokio::time::sleep(d) => {}
            }
        }
        if self.0.fail_writes.load(Ordering::SeqCst) > 0 {
            self.0.fail_writes.fetch_sub(1, Ordering::SeqCst);
            return Err(IoError::Disconnected);
        }
        self.0.writes.lock().unwrap().push((Instant::now(), line.to_string()));
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.0.alive.load(Ordering::SeqCst) && !self.0.cancel.is_cancelled()
    }

    async fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        self.0.alive.store(false, Ordering::SeqCst);
        self.0.cancel.cancel();
    }
}

struct Plan {
    delay: Duration,
    outcome: Result<ScriptedSession, ConnectError>,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    plans: Arc<Mutex<HashMap<String, Plan>>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn succeed(&self, device: &str, delay: Duration) -> ScriptedSession {
        let session = ScriptedSession::new();
        self.plans
            .lock()
            .unwrap()
            .insert(device.to_string(), Plan { delay, outcome: Ok(session.clone()) });
        session
    }

    pub fn fail(&self, device: &str, delay: Duration, err: ConnectError) {
        self.plans.lock().unwrap().insert(device.to_string(), Plan { delay, outcome: Err(err) });
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self, device: &DeviceId) -> Result<ScriptedSession, ConnectError> {
        self.attempts.lock().unwrap().push(device.to_string());
        let plan = self.plans.lock().unwrap().remove(device.as_str());
        let Some(plan) = plan else {
            return Err(ConnectError::Unavailable(format!("{} not paired", device)));
        };
        tokio::time::sleep(plan.delay).await;
        plan.outcome
    }
}

pub fn test_policy() -> LinkPolicy {
    LinkPolicy {
        write_interval_ms: 100,
        retry_delay_ms: 50,
        max_io_retries: 1,
        connect_timeout_ms: None,
    }
}

pub async fn wait_status(mgr: &LinkManager, mut pred: impl FnMut(&LinkStatus) -> bool) -> LinkStatus {
    let mut rx = mgr.subscribe_status();
    let res = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| pred(s))).await;
    let status = res.expect("timed out waiting for status").expect("manager stopped");
    let out = (*status).clone();
    out
}

pub async fn wait_connected(mgr: &LinkManager, device: &str) {
    wait_status(mgr, |s| matches!(s, LinkStatus::Connected(d) if d.as_str() == device)).await;
}

pub async fn wait_telemetry(mgr: &LinkManager, distances: &[u32]) -> TelemetryRecord {
    let mut rx = mgr.subscribe_telemetry();
    let res = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|t| t.distances == distances)).await;
    let rec = res.expect("timed out waiting for telemetry").expect("manager stopped");
    let out = (*rec).clone();
    out
}
