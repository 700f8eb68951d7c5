//! Link manager: owns zero or one session and the two loops running against it.
//!
//! The manager is an actor. Callers talk to it through [`LinkManager`]; the
//! read/write loops only report back through the event channel, so session
//! ownership and status are only ever changed from inside the actor.

use std::future::Future;
use std::sync::Arc;

use rover_proto::{frame, TelemetryRecord};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::ControlState;
use crate::status::{LinkCounters, LinkStats, LinkStatus};
use crate::transport::{ConnectError, Connector, DeviceId, IoError, Session};
use crate::LinkPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("link manager has shut down")]
pub struct LinkClosed;

enum Request {
    Connect(DeviceId),
    Disconnect,
    Shutdown(oneshot::Sender<()>),
}

enum Event<S> {
    ConnectFinished {
        generation: u64,
        device: DeviceId,
        result: Result<S, ConnectError>,
    },
    SessionDied {
        generation: u64,
        op: &'static str,
    },
}

struct ActiveSession<S> {
    generation: u64,
    device: DeviceId,
    session: Arc<S>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

enum State<S> {
    Idle,
    Connecting { generation: u64, device: DeviceId },
    Active(ActiveSession<S>),
}

/// Handle to the link. Dropping it tears the link down.
pub struct LinkManager {
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<LinkStatus>,
    telemetry: watch::Receiver<TelemetryRecord>,
    control: ControlState,
    counters: Arc<LinkCounters>,
    task: JoinHandle<()>,
}

impl LinkManager {
    /// Starts the manager on the current tokio runtime.
    pub fn spawn<C: Connector>(connector: C, policy: LinkPolicy) -> Self {
        let control = ControlState::new();
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::Disconnected);
        let (telemetry_tx, telemetry_rx) = watch::channel(TelemetryRecord::default());
        let counters = Arc::new(LinkCounters::default());

        let actor = Actor {
            connector: Arc::new(connector),
            policy,
            control: control.clone(),
            status: status_tx,
            telemetry: Arc::new(telemetry_tx),
            counters: counters.clone(),
            events: ev_tx,
            generation: 0,
            state: State::Idle,
        };
        let task = tokio::spawn(actor.run(req_rx, ev_rx));

        Self {
            requests: req_tx,
            status: status_rx,
            telemetry: telemetry_rx,
            control,
            counters,
            task,
        }
    }

    /// Supersedes any attempt in flight and any active session.
    pub fn request_connect(&self, device: impl Into<DeviceId>) -> Result<(), LinkClosed> {
        self.requests.send(Request::Connect(device.into())).map_err(|_| LinkClosed)
    }

    pub fn request_disconnect(&self) -> Result<(), LinkClosed> {
        self.requests.send(Request::Disconnect).map_err(|_| LinkClosed)
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Most recent successfully decoded telemetry line.
    pub fn telemetry(&self) -> TelemetryRecord {
        self.telemetry.borrow().clone()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<TelemetryRecord> {
        self.telemetry.clone()
    }

    pub fn control(&self) -> ControlState {
        self.control.clone()
    }

    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    /// Disconnects and waits for the actor to stop.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

struct Actor<C: Connector> {
    connector: Arc<C>,
    policy: LinkPolicy,
    control: ControlState,
    status: watch::Sender<LinkStatus>,
    telemetry: Arc<watch::Sender<TelemetryRecord>>,
    counters: Arc<LinkCounters>,
    events: mpsc::UnboundedSender<Event<C::Session>>,
    generation: u64,
    state: State<C::Session>,
}

impl<C: Connector> Actor<C> {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: mpsc::UnboundedReceiver<Event<C::Session>>,
    ) {
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(Request::Connect(device)) => self.begin_connect(device).await,
                    Some(Request::Disconnect) => {
                        self.teardown().await;
                        self.set_status(LinkStatus::Disconnected);
                    }
                    Some(Request::Shutdown(done)) => {
                        self.teardown().await;
                        self.set_status(LinkStatus::Disconnected);
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(ev) = events.recv() => self.on_event(ev).await,
            }
        }
        debug!("link: manager stopped");
    }

    fn set_status(&self, next: LinkStatus) {
        self.status.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            debug!("link: status {} -> {}", cur, next);
            *cur = next;
            true
        });
    }

    async fn begin_connect(&mut self, device: DeviceId) {
        self.teardown().await;

        self.generation += 1;
        let generation = self.generation;
        self.state = State::Connecting { generation, device: device.clone() };
        self.set_status(LinkStatus::Connecting(device.clone()));
        info!("link: connecting to {} (attempt {})", device, generation);

        let connector = self.connector.clone();
        let events = self.events.clone();
        let timeout = self.policy.connect_timeout();
        tokio::spawn(async move {
            let attempt = connector.connect(&device);
            let result = match timeout {
                Some(t) => tokio::time::timeout(t, attempt).await.unwrap_or_else(|_| {
                    Err(ConnectError::Unavailable(format!("no answer within {} ms", t.as_millis())))
                }),
                None => attempt.await,
            };
            let _ = events.send(Event::ConnectFinished { generation, device, result });
        });
    }

    async fn on_event(&mut self, ev: Event<C::Session>) {
        match ev {
            Event::ConnectFinished { generation, device, result } => {
                let current = matches!(self.state, State::Connecting { generation: g, .. } if g == generation);
                match result {
                    Ok(session) if !current => {
                        info!("link: closing superseded session to {}", device);
                        session.close().await;
                    }
                    Err(e) if !current => {
                        debug!("link: superseded attempt to {} failed: {}", device, e);
                    }
                    Ok(session) => self.activate(generation, device, session),
                    Err(e) => {
                        warn!("link: connect to {} failed: {}", device, e);
                        self.state = State::Idle;
                        self.set_status(LinkStatus::Failed(e));
                    }
                }
            }
            Event::SessionDied { generation, op } => {
                let current = matches!(&self.state, State::Active(a) if a.generation == generation);
                if !current {
                    return;
                }
                if let State::Active(active) = std::mem::replace(&mut self.state, State::Idle) {
                    warn!("link: lost {} ({} failed after retry)", active.device, op);
                    LinkCounters::bump(&self.counters.sessions_lost);
                    close_active(active).await;
                }
                self.set_status(LinkStatus::Disconnected);
            }
        }
    }

    fn activate(&mut self, generation: u64, device: DeviceId, session: C::Session) {
        let session = Arc::new(session);
        let cancel = CancellationToken::new();
        let ctx = LoopCtx {
            generation,
            session: session.clone(),
            cancel: cancel.clone(),
            policy: self.policy.clone(),
            counters: self.counters.clone(),
            events: self.events.clone(),
        };
        let reader = tokio::spawn(read_loop(ctx.clone(), self.telemetry.clone()));
        let writer = tokio::spawn(write_loop(ctx, self.control.clone()));

        LinkCounters::bump(&self.counters.sessions_opened);
        info!("link: connected to {}", device);
        self.state = State::Active(ActiveSession { generation, device: device.clone(), session, cancel, reader, writer });
        self.set_status(LinkStatus::Connected(device));
    }

    /// Back to Idle. An attempt in flight is orphaned; its result will not match the state.
    async fn teardown(&mut self) {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {}
            State::Connecting { device, .. } => info!("link: abandoning connect to {}", device),
            State::Active(active) => {
                info!("link: disconnecting from {}", active.device);
                close_active(active).await;
            }
        }
    }
}

async fn close_active<S: Session>(active: ActiveSession<S>) {
    active.cancel.cancel();
    active.session.close().await;
    for handle in [active.reader, active.writer] {
        if let Err(e) = handle.await {
            if e.is_panic() {
                warn!("link: loop panicked: {}", e);
            }
        }
    }
}

struct LoopCtx<S> {
    generation: u64,
    session: Arc<S>,
    cancel: CancellationToken,
    policy: LinkPolicy,
    counters: Arc<LinkCounters>,
    events: mpsc::UnboundedSender<Event<S>>,
}

impl<S> Clone for LoopCtx<S> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            session: self.session.clone(),
            cancel: self.cancel.clone(),
            policy: self.policy.clone(),
            counters: self.counters.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: Session> LoopCtx<S> {
    fn report_death(&self, op: &'static str) {
        let _ = self.events.send(Event::SessionDied { generation: self.generation, op });
    }

    /// Runs one I/O operation. On failure waits `retry_delay`, and while the
    /// session still probes alive retries up to `max_io_retries` times.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, IoError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IoError>>,
    {
        let mut err = match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        for n in 1..=self.policy.max_io_retries {
            debug!("link: {} failed ({}), retry {} in {:?}", op, err, n, self.policy.retry_delay());
            tokio::time::sleep(self.policy.retry_delay()).await;
            if !self.session.is_alive() {
                debug!("link: session no longer alive, giving up on {}", op);
                break;
            }
            LinkCounters::bump(&self.counters.io_retries);
            match attempt().await {
                Ok(v) => {
                    info!("link: {} recovered after {} retry(s)", op, n);
                    return Ok(v);
                }
                Err(e) => err = e,
            }
        }
        Err(err)
    }
}

async fn read_loop<S: Session>(ctx: LoopCtx<S>, telemetry: Arc<watch::Sender<TelemetryRecord>>) {
    loop {
        let res = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            r = ctx.with_retry("read", || ctx.session.read_line()) => r,
        };
        let line = match res {
            Ok(line) => line,
            Err(_) => {
                ctx.report_death("read");
                return;
            }
        };
        LinkCounters::bump(&ctx.counters.lines_received);
        match frame::decode(&line) {
            Ok(rec) => {
                LinkCounters::bump(&ctx.counters.telemetry_published);
                telemetry.send_replace(rec);
            }
            Err(e) => {
                LinkCounters::bump(&ctx.counters.malformed_dropped);
                debug!("link: dropped telemetry line {:?}: {}", line.trim_end(), e);
            }
        }
    }
}

async fn write_loop<S: Session>(ctx: LoopCtx<S>, control: ControlState) {
    let mut ticker = tokio::time::interval(ctx.policy.write_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let line = frame::encode(&control.snapshot());
        let res = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            r = ctx.with_retry("write", || ctx.session.write_line(&line)) => r,
        };
        match res {
            Ok(()) => LinkCounters::bump(&ctx.counters.commands_written),
            Err(_) => {
                ctx.report_death("write");
                return;
            }
        }
    }
}
