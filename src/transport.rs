//! Framed TCP transport shared by the master and chunkserver clients.
//!
//! A [`Transport`] owns at most one connection. All I/O goes through a
//! [`TransportGuard`] obtained from [`Transport::lock`], so a whole request and
//! its reply (or a whole handshake) run without interleaving with anyone else
//! using the same transport. Any I/O failure drops the connection; the next
//! user has to reconnect.

use crate::config::NetworkConfig;
use crate::error::{MfsError, Result};
use crate::observability;
use crate::protocol::{FrameHeader, MAX_FRAME_SIZE};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Timeouts and retry policy for one transport.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub connect_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for TransportSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
            connect_attempts: config.connect_attempts.max(1),
            retry_backoff: config.retry_backoff,
        }
    }
}

/// One TCP connection to a master or chunkserver.
pub struct Transport {
    kind: &'static str,
    peer: String,
    settings: TransportSettings,
    stream: Mutex<Option<TcpStream>>,
}

impl Transport {
    /// Create a transport without connecting. `kind` labels logs and metrics.
    pub fn new(kind: &'static str, peer: impl Into<String>, settings: TransportSettings) -> Self {
        Self {
            kind,
            peer: peer.into(),
            settings,
            stream: Mutex::new(None),
        }
    }

    /// Create a transport and connect it.
    pub async fn open(
        kind: &'static str,
        peer: impl Into<String>,
        settings: TransportSettings,
    ) -> Result<Self> {
        let transport = Self::new(kind, peer, settings);
        transport.lock().await.connect().await?;
        Ok(transport)
    }

    /// Remote address this transport dials.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Take exclusive use of the connection.
    pub async fn lock(&self) -> TransportGuard<'_> {
        TransportGuard {
            transport: self,
            stream: self.stream.lock().await,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Drop the connection. Safe to call when already closed.
    pub async fn close(&self) {
        self.lock().await.close();
    }
}

/// Exclusive access to a transport's connection.
pub struct TransportGuard<'a> {
    transport: &'a Transport,
    stream: MutexGuard<'a, Option<TcpStream>>,
}

impl TransportGuard<'_> {
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer(&self) -> &str {
        &self.transport.peer
    }

    /// Connect if not connected. Returns `true` when a new connection was made.
    pub async fn connect(&mut self) -> Result<bool> {
        if self.stream.is_some() {
            return Ok(false);
        }
        let stream = dial(&self.transport.peer, &self.transport.settings).await?;
        observability::record_connect(self.transport.kind);
        debug!(peer = %self.transport.peer, kind = self.transport.kind, "Connected");
        *self.stream = Some(stream);
        Ok(true)
    }

    /// Write the whole buffer.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let io_timeout = self.transport.settings.io_timeout;
        let peer = &self.transport.peer;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MfsError::NotConnected(peer.clone()))?;

        let result = match tokio::time::timeout(io_timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MfsError::Network(format!("send to {}: {}", peer, e))),
            Err(_) => Err(MfsError::Timeout(io_timeout.as_millis() as u64)),
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    /// Fill `buf` completely. A short read is an error.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        let io_timeout = self.transport.settings.io_timeout;
        let peer = &self.transport.peer;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MfsError::NotConnected(peer.clone()))?;

        let result = match tokio::time::timeout(io_timeout, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(MfsError::Network(
                format!("connection to {} closed by peer", peer),
            )),
            Ok(Err(e)) => Err(MfsError::Network(format!("recv from {}: {}", peer, e))),
            Err(_) => Err(MfsError::Timeout(io_timeout.as_millis() as u64)),
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    /// Read one frame header.
    pub async fn recv_header(&mut self) -> Result<FrameHeader> {
        let mut head = [0u8; FrameHeader::LEN];
        self.recv(&mut head).await?;
        Ok(FrameHeader::decode(&head))
    }

    /// Read a payload of `size` bytes.
    pub async fn recv_payload(&mut self, size: u32) -> Result<Vec<u8>> {
        if size > MAX_FRAME_SIZE {
            self.close();
            return Err(MfsError::protocol(
                "recv",
                format!("frame of {} bytes from {} exceeds limit", size, self.transport.peer),
            ));
        }
        let mut payload = vec![0u8; size as usize];
        self.recv(&mut payload).await?;
        Ok(payload)
    }

    /// Drop the connection.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(peer = %self.transport.peer, kind = self.transport.kind, "Connection closed");
        }
    }
}

/// Dial with bounded retries and linear backoff.
async fn dial(peer: &str, settings: &TransportSettings) -> Result<TcpStream> {
    let mut last_error = String::new();

    for attempt in 1..=settings.connect_attempts {
        match tokio::time::timeout(settings.connect_timeout, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                return Ok(stream);
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {:?}", settings.connect_timeout),
        }

        warn!(peer = %peer, attempt, error = %last_error, "Connect failed");
        if attempt < settings.connect_attempts {
            tokio::time::sleep(settings.retry_backoff * attempt).await;
        }
    }

    Err(MfsError::ConnectionFailed(format!(
        "{} after {} attempts: {}",
        peer, settings.connect_attempts, last_error
    )))
}
