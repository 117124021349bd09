//! Copying between the local filesystem and the cluster.

use super::Client;
use crate::error::Result;
use crate::protocol::{CHUNK_SIZE, WANT_READ};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

impl Client {
    /// Copy local file `local` to `remote`, creating it if needed.
    ///
    /// Returns the number of bytes copied. A longer existing remote file is
    /// cut to the local length.
    pub async fn write_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let mut src = fs::File::open(local).await?;
        let total = src.metadata().await?.len();
        let mut file = self.open_or_create(remote).await?;

        let mut buf = vec![0u8; CHUNK_SIZE as usize];
        let mut offset = 0u64;
        loop {
            let filled = fill(&mut src, &mut buf).await?;
            if filled == 0 {
                break;
            }
            offset += file.write_at(&buf[..filled], offset).await? as u64;
            debug!(
                remote,
                percent = format_args!("{:.2}", percent(offset, total)),
                "Upload progress"
            );
        }

        if file.size() > offset {
            file.truncate(offset).await?;
        }
        info!(local = %local.display(), remote, bytes = offset, "Uploaded file");
        Ok(offset)
    }

    /// Copy `remote` to local file `local`, replacing it.
    pub async fn read_file(&self, remote: &str, local: &Path) -> Result<u64> {
        let file = self.open(remote, WANT_READ).await?;
        let size = file.size();
        let mut dst = fs::File::create(local).await?;

        let mut buf = vec![0u8; CHUNK_SIZE as usize];
        let mut offset = 0u64;
        while offset < size {
            let span = (u64::from(CHUNK_SIZE) - offset % u64::from(CHUNK_SIZE)).min(size - offset);
            let n = file.read_at(&mut buf[..span as usize], offset).await?;
            dst.write_all(&buf[..n]).await?;
            offset += n as u64;
            debug!(
                remote,
                percent = format_args!("{:.2}", percent(offset, size)),
                "Download progress"
            );
        }
        dst.flush().await?;

        info!(remote, local = %local.display(), bytes = offset, "Downloaded file");
        Ok(offset)
    }
}

/// Read until `buf` is full or the source is exhausted.
async fn fill<R: AsyncRead + Unpin>(src: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}
