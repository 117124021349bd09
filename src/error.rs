//! Error types for the MooseFS client.
//!
//! This module provides a unified error type [`MfsError`] for every client
//! operation, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Transport**: connect failures, deadlines and resets. Only the connect
//!   step is retried; everything else is surfaced.
//! - **Protocol**: a reply that does not fit the expected frame layout. The
//!   frame boundary can no longer be trusted, so the connection is dropped
//!   and the call fails without a retry.
//! - **Server status**: a non-zero status byte returned by the master or a
//!   chunkserver, rendered through the status table.
//! - **Integrity**: CRC or block coordinate mismatches on chunk data.
//! - **Validation**: bad names, reserved inodes, missing session. These are
//!   detected before anything is sent.
//!
//! # Example
//!
//! ```rust
//! use moosefs_client::error::{MfsError, Result};
//!
//! fn check_name(name: &str) -> Result<()> {
//!     if name.len() > 255 {
//!         return Err(MfsError::NameTooLong(name.to_string()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_name("file.txt").is_ok());
//! ```

use crate::protocol::status;
use std::io;
use thiserror::Error;

/// Main error type for MooseFS client operations.
#[derive(Error, Debug)]
pub enum MfsError {
    // Transport errors
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Protocol desync
    #[error("Protocol error in {op}: {reason}")]
    Protocol { op: String, reason: String },

    // Server-reported status
    #[error("{op} failed: {message} (status {code})")]
    Status {
        op: String,
        code: u8,
        message: &'static str,
    },

    // Data integrity
    #[error("Checksum mismatch on chunk {chunk_id:#x}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        chunk_id: u64,
        expected: u32,
        actual: u32,
    },

    #[error("Data corruption: {0}")]
    DataCorruption(String),

    // Validation
    #[error("Name too long: {0}")]
    NameTooLong(String),

    #[error("Invalid inode: {0}")]
    InvalidInode(u32),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No session established: {0}")]
    NoSession(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("No chunkserver available for chunk {0:#x}")]
    NoReplicas(u64),

    // Version gating
    #[error("Unsupported master version {found}, need at least {required}")]
    UnsupportedVersion { found: String, required: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MfsError {
    /// Build a protocol desync error.
    pub fn protocol(op: impl Into<String>, reason: impl Into<String>) -> Self {
        MfsError::Protocol {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Build a server status error from a wire status code.
    pub fn status(op: impl Into<String>, code: u8) -> Self {
        MfsError::Status {
            op: op.into(),
            code,
            message: status::strerror(code),
        }
    }

    /// The server status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u8> {
        match self {
            MfsError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Convert to a POSIX errno.
    pub fn to_errno(&self) -> i32 {
        match self {
            MfsError::Status { code, .. } => status::to_errno(*code),
            MfsError::NameTooLong(_) => libc::ENAMETOOLONG,
            MfsError::InvalidInode(_) | MfsError::InvalidArgument(_) | MfsError::InvalidPath(_) => {
                libc::EINVAL
            }
            MfsError::NotADirectory(_) => libc::ENOTDIR,
            MfsError::AlreadyExists(_) => libc::EEXIST,
            MfsError::Timeout(_) => libc::ETIMEDOUT,
            MfsError::ConnectionFailed(_) => libc::ECONNREFUSED,
            MfsError::NotConnected(_) | MfsError::NoSession(_) => libc::ENOTCONN,
            MfsError::UnsupportedVersion { .. } => libc::EPROTO,
            MfsError::Protocol { .. } => libc::EPROTO,
            MfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MfsError::ConnectionFailed(_) | MfsError::Timeout(_) | MfsError::NotConnected(_)
        )
    }
}

impl From<serde_json::Error> for MfsError {
    fn from(e: serde_json::Error) -> Self {
        MfsError::Serialization(e.to_string())
    }
}

/// Result type alias for MooseFS client operations.
pub type Result<T> = std::result::Result<T, MfsError>;
