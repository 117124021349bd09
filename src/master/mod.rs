//! Master session client.
//!
//! A [`MasterClient`] owns one connection to the metadata master and the
//! session registered over it. Every call holds the connection for its whole
//! request/reply exchange, so concurrent callers are serialized. The
//! connection is dialed lazily; whenever a fresh connection is made the
//! client first negotiates the master version and, if a session already
//! exists, re-attaches it before sending the caller's request.
//!
//! A background task sends a keepalive frame on the open connection every
//! `heartbeat_interval`. It never dials: a dropped connection stays dropped
//! until the next real call.

mod admin;
mod attr;
mod ops;
mod quota;
mod reply;
mod session;

pub use admin::{MasterInfo, SessionEntry};
pub use attr::{AttrExtra, FileInfo, FileType};
pub use ops::{DirEntry, DirStats, SetAttr, StatInfo};
pub use quota::{QuotaEntry, QuotaInfo, QuotaLimits, QuotaMode};
pub use session::SessionParams;

use crate::config::ClientConfig;
use crate::error::{MfsError, Result};
use crate::observability;
use crate::protocol::{nop_frame, FrameHeader, MFS_NAME_MAX, MIN_SPECIAL_INODE};
use crate::transport::{Transport, TransportGuard, TransportSettings};
use crate::version::Version;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
struct SessionState {
    session_id: u32,
    version: Version,
    params: Option<SessionParams>,
}

struct MasterInner {
    config: ClientConfig,
    transport: Transport,
    state: Mutex<SessionState>,
}

struct Heartbeat {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Client for the metadata master.
pub struct MasterClient {
    inner: Arc<MasterInner>,
    heartbeat: Option<Heartbeat>,
}

impl MasterClient {
    /// Create a client without touching the network.
    ///
    /// Spawns the keepalive task, so this must run inside a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let settings = TransportSettings::from(&config.network);
        let transport = Transport::new("master", config.master.clone(), settings);
        let period = config.heartbeat_interval;
        let inner = Arc::new(MasterInner {
            config,
            transport,
            state: Mutex::new(SessionState::default()),
        });

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(heartbeat_loop(Arc::clone(&inner), period, stop_rx));

        Ok(Self {
            inner,
            heartbeat: Some(Heartbeat { stop, task }),
        })
    }

    /// Create a client and register a session.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.create_session().await?;
        Ok(client)
    }

    /// Connect to `master` with a password and exported subdirectory.
    pub async fn connect_with(master: &str, password: &str, subdir: &str) -> Result<Self> {
        let config = ClientConfig::new(master)
            .with_password(password)
            .with_subdir(subdir);
        Self::connect(config).await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current session id, 0 when no session is registered.
    pub fn session_id(&self) -> u32 {
        self.inner.state.lock().session_id
    }

    pub fn has_session(&self) -> bool {
        self.session_id() != 0
    }

    /// Parameters granted with the current session.
    pub fn session_params(&self) -> Option<SessionParams> {
        self.inner.state.lock().params
    }

    /// Version reported by the master on the current connection.
    pub fn master_version(&self) -> Version {
        self.inner.state.lock().version
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.transport.is_connected().await
    }

    /// Ask the master for its version over the current connection.
    pub async fn version(&self) -> Result<Version> {
        observability::record_master_rpc("get_version");
        let mut guard = self.inner.transport.lock().await;
        let fresh = guard.connect().await?;
        let result = async {
            let version = self.inner.negotiate_version(&mut guard).await?;
            if fresh && self.has_session() {
                self.inner.register(&mut guard).await?;
            }
            Ok(version)
        }
        .await;

        if result.is_err() {
            guard.close();
        }
        result
    }

    /// Drop the master connection. The session stays registered.
    pub async fn disconnect(&self) {
        self.inner.transport.close().await;
    }

    /// Close the session and the connection, and stop the keepalive task.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.stop.send(true);
            let _ = heartbeat.task.await;
        }
        let result = self.close_session().await;
        self.inner.transport.close().await;
        result
    }

    /// Send one request frame and return the reply payload.
    pub(crate) async fn call(&self, op: &'static str, frame: Vec<u8>) -> Result<Vec<u8>> {
        observability::record_master_rpc(op);

        let result = async {
            let mut guard = self.inner.transport.lock().await;
            self.inner.ensure_ready(&mut guard).await?;
            exchange(&mut guard, op, &frame).await
        }
        .await;

        if let Err(e) = &result {
            observability::record_master_error(op);
            debug!(op, error = %e, "Master call failed");
        }
        result
    }

    fn require_session(&self, op: &'static str) -> Result<()> {
        if self.has_session() {
            Ok(())
        } else {
            Err(MfsError::NoSession(op.to_string()))
        }
    }
}

impl Drop for MasterClient {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.stop.send(true);
            heartbeat.task.abort();
        }
    }
}

impl MasterInner {
    /// Connect if needed; a fresh connection is negotiated and re-attached.
    async fn ensure_ready(&self, guard: &mut TransportGuard<'_>) -> Result<()> {
        if !guard.connect().await? {
            return Ok(());
        }

        let outcome = async {
            self.negotiate_version(guard).await?;
            let has_session = self.state.lock().session_id != 0;
            if has_session {
                self.register(guard).await?;
            }
            Ok(())
        }
        .await;

        if outcome.is_err() {
            guard.close();
        }
        outcome
    }

    async fn heartbeat(&self) {
        let mut guard = self.transport.lock().await;
        if !guard.is_connected() {
            return;
        }
        if let Err(e) = guard.send(&nop_frame()).await {
            warn!(master = %guard.peer(), error = %e, "Heartbeat failed");
        }
    }
}

async fn heartbeat_loop(inner: Arc<MasterInner>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => inner.heartbeat().await,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Heartbeat stopped");
}

/// Send `frame` and read the matching reply, skipping keepalives.
///
/// A reply whose command is not the request command plus one closes the
/// connection, since the stream can no longer be trusted.
pub(crate) async fn exchange(
    guard: &mut TransportGuard<'_>,
    op: &'static str,
    frame: &[u8],
) -> Result<Vec<u8>> {
    let request = FrameHeader::peek(frame)
        .ok_or_else(|| MfsError::Internal(format!("{}: request shorter than a header", op)))?;

    guard.send(frame).await?;

    let header = loop {
        let header = guard.recv_header().await?;
        if header.is_nop() {
            guard.recv_payload(header.size).await?;
            continue;
        }
        break header;
    };

    if header.cmd != request.cmd + 1 {
        guard.close();
        return Err(MfsError::protocol(
            op,
            format!(
                "expected reply command {}, got {}",
                request.cmd + 1,
                header.cmd
            ),
        ));
    }

    guard.recv_payload(header.size).await
}

pub(crate) fn check_inode(inode: u32) -> Result<()> {
    if inode == 0 || inode >= MIN_SPECIAL_INODE {
        return Err(MfsError::InvalidInode(inode));
    }
    Ok(())
}

pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.len() > MFS_NAME_MAX {
        return Err(MfsError::NameTooLong(name.to_string()));
    }
    Ok(())
}
