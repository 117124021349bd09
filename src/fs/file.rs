//! Open files.

use super::Client;
use crate::chunk::{chunk_index, chunk_offset};
use crate::error::{MfsError, Result};
use crate::master::{AttrExtra, FileInfo};
use crate::protocol::CHUNK_SIZE;
use std::io::SeekFrom;
use tracing::{debug, warn};

/// An open file on the cluster.
///
/// Data moves chunk by chunk: each chunk touched by a transfer is located
/// through the master and then read from or written to a chunkserver.
pub struct File<'a> {
    client: &'a Client,
    path: String,
    info: FileInfo,
    pos: u64,
}

impl<'a> File<'a> {
    pub(super) fn new(client: &'a Client, path: &str, info: FileInfo) -> Self {
        Self {
            client,
            path: path.to_string(),
            info,
            pos: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn inode(&self) -> u32 {
        self.info.inode
    }

    /// Attributes as last seen by this handle.
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn size(&self) -> u64 {
        self.info.size()
    }

    /// Offset used by [`File::read`] and [`File::write`].
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read into `buf` starting at `offset`.
    ///
    /// Fails when `offset` is at or past the end of the file; a read running
    /// past the end is cut short.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.size();
        if offset >= size {
            return Err(MfsError::InvalidArgument(format!(
                "read offset {} is at or past the end of {} ({} bytes)",
                offset, self.path, size
            )));
        }

        let len = (size - offset).min(buf.len() as u64) as usize;
        let master = self.client.master();
        let inode = self.info.inode;

        let mut done = 0usize;
        while done < len {
            let at = offset + done as u64;
            let index = chunk_index(at);
            let within = chunk_offset(at);
            let span = chunk_span(within, len - done);

            let loc = master.read_chunk(inode, index, 0).await?;
            debug!(inode, index, offset = within, len = span, "Reading chunk");
            let n = self
                .client
                .chunk_io()
                .read(&loc, within, &mut buf[done..done + span])
                .await?;
            done += n;
        }
        Ok(done)
    }

    /// Write `data` at `offset`, growing the file if needed.
    pub async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        let master = self.client.master();
        let inode = self.info.inode;

        let mut done = 0usize;
        while done < data.len() {
            let at = offset + done as u64;
            let index = chunk_index(at);
            let within = chunk_offset(at);
            let span = chunk_span(within, data.len() - done);

            let loc = master.write_chunk(inode, index, 0).await?;
            debug!(inode, index, chunk_id = loc.chunk_id, offset = within, len = span, "Writing chunk");

            let written = self
                .client
                .chunk_io()
                .write(&loc, within, &data[done..done + span])
                .await;
            let n = match written {
                Ok(n) => n,
                Err(e) => {
                    // Release the chunk without publishing a new length.
                    if let Err(end_err) = master
                        .write_chunk_end(loc.chunk_id, inode, index, self.size(), 0)
                        .await
                    {
                        warn!(inode, chunk_id = loc.chunk_id, error = %end_err, "Failed to release chunk");
                    }
                    return Err(e);
                }
            };

            let length = self.size().max(at + n as u64);
            master
                .write_chunk_end(loc.chunk_id, inode, index, length, 0)
                .await?;
            self.info.extra = AttrExtra::Length(length);
            done += n;
        }
        Ok(done)
    }

    /// Read at the current position and advance it. Returns 0 at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pos >= self.size() {
            return Ok(0);
        }
        let n = self.read_at(buf, self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the current position and advance it.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let n = self.write_at(data, self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Move the position used by sequential reads and writes.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            MfsError::InvalidArgument(format!("seek to {:?} leaves the file", pos))
        })?;
        self.pos = target;
        Ok(target)
    }

    /// Set the file length.
    pub async fn truncate(&mut self, length: u64) -> Result<()> {
        self.info = self.client.master().truncate(self.info.inode, 0, length).await?;
        Ok(())
    }

    /// Reload attributes from the master.
    pub async fn refresh(&mut self) -> Result<&FileInfo> {
        self.info = self.client.master().getattr(self.info.inode).await?;
        Ok(&self.info)
    }
}

/// Bytes of a transfer that fit in the chunk from `within` on.
fn chunk_span(within: u32, remaining: usize) -> usize {
    ((CHUNK_SIZE - within) as usize).min(remaining)
}
