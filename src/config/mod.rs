//! Configuration module for the MooseFS client.

use crate::error::{MfsError, Result};
use crate::protocol::{
    DEFAULT_MASTER_PORT, MASTER_HEARTBEAT_INTERVAL, TCP_CONNECT_TIMEOUT, TCP_RETRY_TIMES,
    TCP_RW_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration.
///
/// Supplied once at construction; the client never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Master endpoint as `host[:port]`.
    pub master: String,
    /// Shared secret for the registration challenge.
    #[serde(default)]
    pub password: Option<String>,
    /// Directory of the cluster namespace exported as this client's root.
    #[serde(default = "default_subdir")]
    pub subdir: String,
    /// Label reported to the master as the local mount point.
    #[serde(default = "default_root_label")]
    pub root_label: String,
    /// Credentials sent with every metadata call.
    #[serde(default = "default_uid")]
    pub uid: u32,
    #[serde(default = "default_gid")]
    pub gid: u32,
    /// Keepalive period on the master connection.
    #[serde(default = "default_heartbeat", with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_subdir() -> String {
    "/".to_string()
}

fn default_root_label() -> String {
    "/mnt/client".to_string()
}

fn default_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

fn default_gid() -> u32 {
    // SAFETY: getgid has no preconditions and cannot fail.
    unsafe { libc::getgid() }
}

fn default_heartbeat() -> Duration {
    MASTER_HEARTBEAT_INTERVAL
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            master: format!("127.0.0.1:{}", DEFAULT_MASTER_PORT),
            password: None,
            subdir: default_subdir(),
            root_label: default_root_label(),
            uid: default_uid(),
            gid: default_gid(),
            heartbeat_interval: default_heartbeat(),
            network: NetworkConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for a master endpoint with everything else defaulted.
    pub fn new(master: &str) -> Self {
        Self {
            master: normalize_master_addr(master),
            ..Default::default()
        }
    }

    /// Builder-style password setter. Empty strings mean no password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = if password.is_empty() { None } else { Some(password) };
        self
    }

    /// Builder-style subdirectory setter. Relative paths are anchored at `/`.
    pub fn with_subdir(mut self, subdir: &str) -> Self {
        self.subdir = normalize_subdir(subdir);
        self
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MfsError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| MfsError::Config(format!("Failed to parse config: {}", e)))?;

        config.master = normalize_master_addr(&config.master);
        config.subdir = normalize_subdir(&config.subdir);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let port = self
            .master
            .rsplit_once(':')
            .and_then(|(host, port)| if host.is_empty() { None } else { Some(port) })
            .ok_or_else(|| MfsError::InvalidConfig {
                field: "master".to_string(),
                reason: format!("expected host:port, got {:?}", self.master),
            })?;

        match port.parse::<u16>() {
            Ok(0) | Err(_) => {
                return Err(MfsError::InvalidConfig {
                    field: "master".to_string(),
                    reason: format!("invalid port {:?}", port),
                })
            }
            Ok(_) => {}
        }

        if !self.subdir.starts_with('/') {
            return Err(MfsError::InvalidConfig {
                field: "subdir".to_string(),
                reason: "Subdirectory must be absolute".to_string(),
            });
        }

        if self.heartbeat_interval.is_zero() {
            return Err(MfsError::InvalidConfig {
                field: "heartbeat_interval".to_string(),
                reason: "Heartbeat interval must be non-zero".to_string(),
            });
        }

        if self.network.connect_attempts == 0 {
            return Err(MfsError::InvalidConfig {
                field: "network.connect_attempts".to_string(),
                reason: "At least one connect attempt is required".to_string(),
            });
        }

        Ok(())
    }

    /// The password to hash during registration, if any.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

/// Append the default master port when the address has none.
pub fn normalize_master_addr(addr: &str) -> String {
    let addr = addr.trim();
    let has_port = addr
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);
    if has_port {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_MASTER_PORT)
    }
}

fn normalize_subdir(subdir: &str) -> String {
    let subdir = subdir.trim();
    if subdir.is_empty() {
        "/".to_string()
    } else if subdir.starts_with('/') {
        subdir.to_string()
    } else {
        format!("/{}", subdir)
    }
}

/// Network configuration shared by master and chunkserver connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-attempt connect timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Deadline for each send or receive.
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    /// Connect attempts before giving up.
    pub connect_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff` before the next.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: TCP_CONNECT_TIMEOUT,
            io_timeout: TCP_RW_TIMEOUT,
            connect_attempts: TCP_RETRY_TIMES,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
