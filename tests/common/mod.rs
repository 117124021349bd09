//! Common test utilities for integration tests.

pub mod fixtures;
pub mod mock_chunkserver;
pub mod mock_master;

use moosefs_client::config::{ClientConfig, NetworkConfig};
use moosefs_client::protocol::{frame, FrameHeader};
use moosefs_client::transport::TransportSettings;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// Re-export common types
pub use fixtures::*;
pub use mock_chunkserver::*;
pub use mock_master::*;

/// Network settings that fail fast.
pub fn fast_network() -> NetworkConfig {
    NetworkConfig {
        connect_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_secs(2),
        connect_attempts: 1,
        retry_backoff: Duration::from_millis(10),
    }
}

pub fn fast_settings() -> TransportSettings {
    TransportSettings::from(&fast_network())
}

/// Client configuration for a mock master.
pub fn test_config(master: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new(&master.to_string());
    config.network = fast_network();
    config.uid = 1000;
    config.gid = 1000;
    config
}

/// Read one frame; `None` once the peer has closed the connection.
pub async fn read_frame(sock: &mut TcpStream) -> std::io::Result<Option<(u32, Vec<u8>)>> {
    let mut header = [0u8; FrameHeader::LEN];
    match sock.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let header = FrameHeader::decode(&header);
    let mut payload = vec![0u8; header.size as usize];
    sock.read_exact(&mut payload).await?;
    Ok(Some((header.cmd, payload)))
}

pub async fn write_frame(sock: &mut TcpStream, cmd: u32, payload: &[u8]) -> std::io::Result<()> {
    sock.write_all(&frame(cmd, payload)).await
}
