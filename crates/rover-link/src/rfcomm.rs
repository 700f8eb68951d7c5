use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::devices::DeviceRegistry;
use crate::transport::{ConnectError, Connector, DeviceId, IoError, Session};

/// Longest inbound line kept. Anything longer is skipped up to the next newline.
pub const MAX_LINE_LEN: usize = 4096;

/// Accumulates bytes across calls until a newline arrives. Progress survives
/// a cancelled or failed read, so a retry picks up mid-line.
struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    overflowed: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::with_capacity(64),
            overflowed: false,
        }
    }

    /// `Ok(None)` at end of stream. An unterminated tail is discarded.
    async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !self.pending.is_empty() {
                    debug!("discarding {} byte unterminated tail", self.pending.len());
                    self.pending.clear();
                }
                self.overflowed = false;
                return Ok(None);
            }

            let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..=i], true),
                None => (available, false),
            };
            let used = chunk.len();
            if !self.overflowed {
                if self.pending.len() + used > MAX_LINE_LEN {
                    self.overflowed = true;
                    self.pending.clear();
                } else {
                    self.pending.extend_from_slice(chunk);
                }
            }
            self.inner.consume(used);

            if complete {
                if self.overflowed {
                    self.overflowed = false;
                    warn!("dropped inbound line longer than {} bytes", MAX_LINE_LEN);
                    continue;
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
        }
    }
}

/// Line session over any byte stream. Read and write halves are locked
/// separately so the two loops never wait on each other.
pub struct StreamSession<T> {
    label: String,
    reader: AsyncMutex<LineReader<ReadHalf<T>>>,
    writer: AsyncMutex<WriteHalf<T>>,
    alive: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl<T> StreamSession<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(label: impl Into<String>, stream: T) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self {
            label: label.into(),
            reader: AsyncMutex::new(LineReader::new(r)),
            writer: AsyncMutex::new(w),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    fn note_error(&self, op: &str, e: &io::Error) {
        if is_connection_lost(e) {
            self.mark_dead(op);
        }
        debug!("session {}: {} failed: {}", self.label, op, e);
    }

    fn mark_dead(&self, why: &str) {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!("session {}: peer gone ({})", self.label, why);
        }
    }
}

fn is_connection_lost(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[async_trait]
impl<T> Session for StreamSession<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_line(&self) -> Result<String, IoError> {
        if !self.is_alive() {
            return Err(IoError::Disconnected);
        }
        let mut reader = tokio::select! {
            _ = self.cancel.cancelled() => return Err(IoError::Disconnected),
            r = self.reader.lock() => r,
        };

        // Raw bytes: a garbled line should reach the decoder and be dropped
        // there, not surface as an I/O error.
        let res = tokio::select! {
            _ = self.cancel.cancelled() => return Err(IoError::Disconnected),
            r = reader.next_line() => r,
        };
        match res {
            Ok(None) => {
                self.mark_dead("eof");
                Err(IoError::Disconnected)
            }
            Ok(Some(buf)) => Ok(String::from_utf8_lossy(&buf).into_owned()),
            Err(e) => {
                self.note_error("read", &e);
                Err(IoError::Disconnected)
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), IoError> {
        if !self.is_alive() {
            return Err(IoError::Disconnected);
        }
        let mut writer = tokio::select! {
            _ = self.cancel.cancelled() => return Err(IoError::Disconnected),
            w = self.writer.lock() => w,
        };
        let res = tokio::select! {
            _ = self.cancel.cancelled() => return Err(IoError::Disconnected),
            r = async {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await
            } => r,
        };
        res.map_err(|e| {
            self.note_error("write", &e);
            IoError::Disconnected
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("session {}: shutdown: {}", self.label, e);
        }
        info!("session {}: closed", self.label);
    }
}

/// Opens the RFCOMM serial node a paired rover is bound to.
pub struct RfcommConnector {
    registry: DeviceRegistry,
}

impl RfcommConnector {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Connector for RfcommConnector {
    type Session = StreamSession<SerialStream>;

    async fn connect(&self, device: &DeviceId) -> Result<Self::Session, ConnectError> {
        let dev = self
            .registry
            .resolve(device.as_str())
            .ok_or_else(|| ConnectError::Unavailable(format!("{} is not a paired device", device)))?;
        if !dev.speaks_spp() {
            return Err(ConnectError::Unavailable(format!(
                "{} does not offer the serial port profile (service {})",
                dev.name, dev.service_uuid
            )));
        }

        let port = dev.port.clone();
        let baud = dev.baud;
        info!("rfcomm: connecting to {} ({}) via {} @ {}", dev.name, dev.id, port, baud);

        // Opening a bound rfcomm node performs the baseband connect and blocks until it finishes.
        let opened = tokio::task::spawn_blocking({
            let port = port.clone();
            move || tokio_serial::new(&port, baud).open_native_async()
        })
        .await
        .map_err(|e| ConnectError::Unavailable(format!("{}: open task failed: {}", port, e)))?;

        match opened {
            Ok(stream) => Ok(StreamSession::new(format!("{}@{}", dev.name, port), stream)),
            Err(e) => {
                warn!("rfcomm: open {} failed: {}", port, e);
                Err(map_open_error(&port, e))
            }
        }
    }
}

fn map_open_error(port: &str, e: tokio_serial::Error) -> ConnectError {
    use tokio_serial::ErrorKind;
    match e.kind {
        ErrorKind::Io(io::ErrorKind::PermissionDenied | io::ErrorKind::ConnectionRefused) => {
            ConnectError::Refused(format!("{}: {}", port, e))
        }
        _ => ConnectError::Unavailable(format!("{}: {}", port, e)),
    }
}
