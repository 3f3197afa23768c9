//! Driver for line-oriented devices exposed as tty nodes.
//!
//! Line discipline (baud rate, parity) is expected to be configured outside
//! the process, e.g. by a udev rule or `stty`. The driver only opens the node,
//! optionally identifies the peer, and turns every received line into a sample.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::{DeviceConfig, IdentifyConfig};

use super::{DeviceDriver, DeviceKind, DriverError, DriverEvent, PositionDriver, ScanCandidate};

const EVENT_CAPACITY: usize = 128;

pub struct TtyDriver {
    kind: DeviceKind,
    candidates: Vec<String>,
    identify: Option<IdentifyConfig>,
    events: broadcast::Sender<DriverEvent>,
    busy: AtomicBool,
    link: Arc<Link>,
}

/// State shared between the driver and the reader task of the open session.
#[derive(Default)]
struct Link {
    logging: AtomicBool,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
}

struct Session {
    id: u64,
    port: String,
    reader: JoinHandle<()>,
}

impl Link {
    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget session `id` and its logging if it is still the open one.
    fn release(&self, id: u64) -> bool {
        let mut session = self.session();
        if session.as_ref().is_none_or(|open| open.id != id) {
            return false;
        }
        *session = None;
        self.logging.store(false, Ordering::SeqCst);
        true
    }
}

/// Clears the busy flag when the handshake ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TtyDriver {
    pub fn new(kind: DeviceKind, config: &DeviceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            kind,
            candidates: config.ports.clone(),
            identify: config.identify.clone(),
            events,
            busy: AtomicBool::new(false),
            link: Arc::new(Link::default()),
        }
    }

    pub fn active_port(&self) -> Option<String> {
        self.link
            .session()
            .as_ref()
            .map(|session| session.port.clone())
    }

    async fn probe(&self, port: &str) -> ScanCandidate {
        let exists = tokio::fs::metadata(port).await.is_ok();
        let mut candidate = ScanCandidate {
            port: port.to_string(),
            identified: false,
            info: None,
        };

        if !exists {
            trace!("{port} does not exist");
            return candidate;
        }

        match &self.identify {
            None => candidate.identified = true,
            Some(identify) => match query_identity(port, identify).await {
                Ok(reply) if reply.contains(&identify.expect) => {
                    candidate.identified = true;
                    candidate.info = Some(reply);
                }
                Ok(reply) => debug!("{port} answered '{reply}', not a {}", self.kind),
                Err(e) => debug!("could not identify {port}: {e}"),
            },
        }

        candidate
    }
}

async fn query_identity(port: &str, identify: &IdentifyConfig) -> Result<String, DriverError> {
    let mut file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(port)
        .await?;
    file.write_all(identify.query.as_bytes()).await?;
    file.flush().await?;

    let mut reply = String::new();
    let mut reader = BufReader::new(file);
    tokio::time::timeout(
        Duration::from_millis(identify.timeout_ms),
        reader.read_line(&mut reply),
    )
    .await
    .map_err(|_| DriverError::Handshake(format!("no reply from {port}")))??;

    Ok(reply.trim().to_string())
}

/// Raw lines that parse as JSON are forwarded as such, everything else as a string.
fn line_to_payload(line: &str) -> serde_json::Value {
    serde_json::from_str(line).unwrap_or_else(|_| serde_json::Value::String(line.to_string()))
}

async fn read_lines(
    link: Arc<Link>,
    id: u64,
    port: String,
    file: tokio::fs::File,
    events: broadcast::Sender<DriverEvent>,
) {
    let mut lines = BufReader::new(file).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = events.send(DriverEvent::Sample(line_to_payload(line)));
            }
            Ok(None) => break format!("{port} closed"),
            Err(e) => break format!("read from {port} failed: {e}"),
        }
    };

    if !link.release(id) {
        trace!("reader of replaced session ended: {reason}");
        return;
    }

    debug!("{reason}");
    let _ = events.send(DriverEvent::ConnectionLost { port, reason });
}

#[async_trait]
impl DeviceDriver for TtyDriver {
    async fn scan(&self) -> Result<Vec<ScanCandidate>, DriverError> {
        let mut found = Vec::with_capacity(self.candidates.len());
        for port in &self.candidates {
            found.push(self.probe(port).await);
        }
        Ok(found)
    }

    async fn connect(&self, port: &str) -> Result<String, DriverError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DriverError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        if !Path::new(port).exists() {
            return Err(DriverError::PortUnavailable {
                port: port.to_string(),
                reason: "no such device".to_string(),
            });
        }

        let file = tokio::fs::File::open(port)
            .await
            .map_err(|e| DriverError::PortUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        let id = self.link.next_session.fetch_add(1, Ordering::Relaxed);
        let previous = {
            // the reader cannot release its session before it is recorded
            let mut session = self.link.session();
            let reader = tokio::spawn(read_lines(
                self.link.clone(),
                id,
                port.to_string(),
                file,
                self.events.clone(),
            ));
            session.replace(Session {
                id,
                port: port.to_string(),
                reader,
            })
        };
        if let Some(previous) = previous {
            warn!("replacing open session on {}", previous.port);
            previous.reader.abort();
        }

        debug!("{} opened {port}", self.kind);
        Ok(port.to_string())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.link.logging.store(false, Ordering::SeqCst);

        let session = self.link.session().take();
        if let Some(session) = session {
            session.reader.abort();
            debug!("{} closed {}", self.kind, session.port);
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl PositionDriver for TtyDriver {
    fn is_logging_active(&self) -> bool {
        self.link.logging.load(Ordering::SeqCst)
    }

    async fn start_logging(&self) -> Result<(), DriverError> {
        // checked under the session lock so a closing reader cannot slip in between
        let session = self.link.session();
        if session.is_none() {
            return Err(DriverError::NotConnected);
        }
        self.link.logging.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_logging(&self) -> Result<(), DriverError> {
        self.link.logging.store(false, Ordering::SeqCst);
        Ok(())
    }
}
