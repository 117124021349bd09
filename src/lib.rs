//! moosefs-client - A native client for MooseFS clusters.
//!
//! This crate speaks the MooseFS wire protocols directly: the metadata
//! protocol of the master and the block protocol of the chunkservers. It can
//! be embedded as a library or used through the `mfs` command-line tool,
//! without a FUSE mount.
//!
//! # Features
//!
//! - **Master sessions**: registration with the password challenge, automatic
//!   re-attachment after a reconnect, and a keepalive task.
//! - **Metadata RPCs**: lookup, attributes, directories, links, quotas and
//!   administrative queries.
//! - **Chunk I/O**: block-level reads and writes with CRC32 verification and
//!   replica failover on read.
//! - **Connection pooling**: an explicitly owned pool of chunkserver
//!   connections.
//! - **Path layer**: open/create/read/write by path, plus local file copies.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  mfs CLI            |  fs::Client / fs::File                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MasterClient       |  ChunkIo                              │
//! │  session, heartbeat |  CRC-checked block transfers          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport          |  ChunkserverPool                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Frame Codec: {cmd, size, payload}, big-endian              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use moosefs_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> moosefs_client::Result<()> {
//!     let client = Client::new(ClientConfig::new("mfsmaster")).await?;
//!
//!     let mut file = client.create("/hello.txt").await?;
//!     file.write(b"hello, moose").await?;
//!
//!     for entry in client.readdir("/").await? {
//!         println!("{}", entry.name);
//!     }
//!     client.close().await
//! }
//! ```

pub mod config;
pub mod error;

pub mod chunk;
pub mod fs;
pub mod master;
pub mod pool;
pub mod protocol;
pub mod transport;
pub mod units;
pub mod version;

pub mod cli;
pub mod observability;

// Re-exports
pub use chunk::{ChunkIo, ChunkLocation, Replica};
pub use config::ClientConfig;
pub use error::{MfsError, Result};
pub use fs::{Client, File};
pub use master::{DirEntry, FileInfo, FileType, MasterClient};
pub use pool::{ChunkserverPool, PoolConfig};
pub use version::Version;
