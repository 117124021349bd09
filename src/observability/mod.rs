//! Observability for the MooseFS client.
//!
//! Logging goes through `tracing`. Counters go through the `metrics` facade;
//! they cost nothing until the embedding application installs a recorder.

use crate::config::ObservabilityConfig;
use crate::error::{MfsError, Result};
use ::tracing::debug;
use metrics::counter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
///
/// `RUST_LOG` wins when set. Otherwise the configured level applies to this
/// crate and the `mfs` binary while dependencies stay at `warn`. Output always
/// goes to stderr so command output on stdout stays clean.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.log_level)).map_err(|e| {
            MfsError::Config(format!("Invalid log level {:?}: {}", config.log_level, e))
        })?,
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init()
    };
    result.map_err(|e| MfsError::Internal(format!("Failed to init logging: {}", e)))?;

    debug!(level = %config.log_level, json = config.json_logs, "Logging initialized");
    Ok(())
}

/// Filter directives for a bare level such as `info`. Anything that already
/// names a target is passed through untouched.
fn default_directives(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    format!("warn,moosefs_client={level},mfs={level}")
}

/// Record a master RPC.
pub fn record_master_rpc(op: &'static str) {
    counter!("mfs_master_rpc_total", "op" => op).increment(1);
}

/// Record a failed master RPC.
pub fn record_master_error(op: &'static str) {
    counter!("mfs_master_rpc_errors_total", "op" => op).increment(1);
}

/// Record bytes read from chunkservers.
pub fn record_chunk_read(bytes: u64) {
    counter!("mfs_chunk_reads_total").increment(1);
    counter!("mfs_chunk_bytes_read").increment(bytes);
}

/// Record bytes written to chunkservers.
pub fn record_chunk_write(bytes: u64) {
    counter!("mfs_chunk_writes_total").increment(1);
    counter!("mfs_chunk_bytes_written").increment(bytes);
}

/// Record a block that failed CRC verification.
pub fn record_crc_error() {
    counter!("mfs_chunk_crc_errors_total").increment(1);
}

/// Record a fresh TCP connection.
pub fn record_connect(peer_kind: &'static str) {
    counter!("mfs_transport_connects_total", "peer" => peer_kind).increment(1);
}
