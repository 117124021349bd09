//! Path-based access to a MooseFS namespace.
//!
//! [`Client`] pairs a master session with chunkserver I/O and resolves
//! slash-separated paths against the exported root or a working directory.
//! Paths are cleaned lexically first, so `a/./b/../c` resolves as `a/c`
//! without asking the master about `.` or `..`.

mod file;
mod local;

pub use file::File;

use crate::chunk::ChunkIo;
use crate::config::ClientConfig;
use crate::error::{MfsError, Result};
use crate::master::{DirEntry, DirStats, FileInfo, MasterClient, StatInfo};
use crate::pool::{ChunkserverPool, PoolConfig};
use crate::protocol::status::ERROR_ENOENT;
use crate::protocol::{MFS_PATH_MAX, MFS_ROOT_ID, WANT_READ, WANT_WRITE};
use crate::transport::TransportSettings;
use parking_lot::Mutex;
use tracing::{debug, info};

const FILE_MODE: u16 = 0o666;
const DIR_MODE: u16 = 0o755;

#[derive(Debug, Clone)]
struct WorkDir {
    path: String,
    inode: u32,
}

/// A mounted view of the cluster namespace.
pub struct Client {
    master: MasterClient,
    io: ChunkIo,
    cwd: Mutex<WorkDir>,
}

impl Client {
    /// Register a session and set up chunkserver I/O.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let settings = TransportSettings::from(&config.network);
        let master = MasterClient::connect(config).await?;
        let pool = ChunkserverPool::new(PoolConfig::default(), settings);
        Ok(Self::from_parts(master, pool))
    }

    /// Connect to `master` with a password and exported subdirectory.
    pub async fn open_session(master: &str, password: &str, subdir: &str) -> Result<Self> {
        let config = ClientConfig::new(master)
            .with_password(password)
            .with_subdir(subdir);
        Self::new(config).await
    }

    /// Build a client from an existing master session and pool.
    pub fn from_parts(master: MasterClient, pool: ChunkserverPool) -> Self {
        Self {
            master,
            io: ChunkIo::new(pool),
            cwd: Mutex::new(WorkDir {
                path: "/".to_string(),
                inode: MFS_ROOT_ID,
            }),
        }
    }

    pub fn master(&self) -> &MasterClient {
        &self.master
    }

    pub fn chunk_io(&self) -> &ChunkIo {
        &self.io
    }

    /// Current working directory.
    pub fn cwd(&self) -> String {
        self.cwd.lock().path.clone()
    }

    /// Close the session, the master connection and every pooled connection.
    pub async fn close(mut self) -> Result<()> {
        let result = self.master.shutdown().await;
        self.io.pool().close_all().await;
        info!("Client closed");
        result
    }

    /// Attributes of the node at `path`.
    pub async fn lookup(&self, path: &str) -> Result<FileInfo> {
        let (_, info) = self.resolve(path).await?;
        Ok(info)
    }

    /// Whether `path` names an existing node.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.lookup(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.status_code() == Some(ERROR_ENOENT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Open an existing file with `WANT_READ` / `WANT_WRITE` flags.
    pub async fn open(&self, path: &str, flags: u8) -> Result<File<'_>> {
        let (_, info) = self.resolve(path).await?;
        let info = self.master.open(info.inode, flags).await?;
        Ok(File::new(self, path, info))
    }

    /// Create a regular file with mode 0666.
    pub async fn create(&self, path: &str) -> Result<File<'_>> {
        let (parent, name) = self.resolve_parent(path).await?;
        let info = self.master.create(parent.inode, &name, FILE_MODE).await?;
        debug!(path, inode = info.inode, "Created file");
        Ok(File::new(self, path, info))
    }

    /// Open `path` for reading and writing, creating it if it is missing.
    pub async fn open_or_create(&self, path: &str) -> Result<File<'_>> {
        if self.exists(path).await? {
            self.open(path, WANT_READ | WANT_WRITE).await
        } else {
            self.create(path).await
        }
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path).await?;
        self.master.unlink(parent.inode, &name).await
    }

    /// Create a directory with mode 0755.
    ///
    /// An existing directory at `path` counts as success; any other existing
    /// node is an error.
    pub async fn mkdir(&self, path: &str) -> Result<FileInfo> {
        match self.lookup(path).await {
            Ok(info) if info.is_dir() => return Ok(info),
            Ok(_) => return Err(MfsError::AlreadyExists(path.to_string())),
            Err(e) if e.status_code() == Some(ERROR_ENOENT) => {}
            Err(e) => return Err(e),
        }

        let (parent, name) = self.resolve_parent(path).await?;
        let info = self.master.mkdir(parent.inode, &name, DIR_MODE).await?;
        debug!(path, inode = info.inode, "Created directory");
        Ok(info)
    }

    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path).await?;
        self.master.rmdir(parent.inode, &name).await
    }

    /// Move `from` to `to`.
    pub async fn rename(&self, from: &str, to: &str) -> Result<FileInfo> {
        let (src, src_name) = self.resolve_parent(from).await?;
        let (dst, dst_name) = self.resolve_parent(to).await?;
        self.master
            .rename(src.inode, &src_name, dst.inode, &dst_name)
            .await
    }

    /// Create a symbolic link at `path` pointing to `target`.
    pub async fn symlink(&self, path: &str, target: &str) -> Result<FileInfo> {
        let (parent, name) = self.resolve_parent(path).await?;
        self.master.symlink(parent.inode, &name, target).await
    }

    pub async fn readlink(&self, path: &str) -> Result<String> {
        let info = self.lookup(path).await?;
        self.master.readlink(info.inode).await
    }

    /// Directory entries of `path`, with attributes.
    pub async fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let info = self.lookup(path).await?;
        self.master.readdir_with_attrs(info.inode).await
    }

    pub async fn dir_stats(&self, path: &str) -> Result<DirStats> {
        let info = self.lookup(path).await?;
        self.master.dir_stats(info.inode).await
    }

    pub async fn chmod(&self, path: &str, mode: u16) -> Result<FileInfo> {
        let info = self.lookup(path).await?;
        self.master.chmod(info.inode, mode).await
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<FileInfo> {
        let info = self.lookup(path).await?;
        self.master.chown(info.inode, uid, gid).await
    }

    /// Set the length of the file at `path`.
    pub async fn truncate(&self, path: &str, length: u64) -> Result<FileInfo> {
        let info = self.lookup(path).await?;
        self.master.truncate(info.inode, 0, length).await
    }

    pub async fn statfs(&self) -> Result<StatInfo> {
        self.master.statfs().await
    }

    /// Change the working directory used for relative paths.
    pub async fn chdir(&self, path: &str) -> Result<()> {
        let target = self.absolute(path)?;
        let (_, info) = self.resolve(&target).await?;
        if !info.is_dir() {
            return Err(MfsError::NotADirectory(path.to_string()));
        }

        *self.cwd.lock() = WorkDir {
            path: target,
            inode: info.inode,
        };
        Ok(())
    }

    /// Resolve `path` to its parent inode and its own attributes.
    ///
    /// The root resolves to itself as parent.
    async fn resolve(&self, path: &str) -> Result<(u32, FileInfo)> {
        let (start, components) = self.start_point(path)?;

        let mut parent = start;
        let mut info: Option<FileInfo> = None;
        for name in &components {
            let dir = info.as_ref().map_or(start, |i| i.inode);
            let found = self.master.lookup(dir, name).await?;
            parent = dir;
            info = Some(found);
        }

        let info = match info {
            Some(info) => info,
            None => self.master.getattr(start).await?,
        };
        debug!(path, parent, inode = info.inode, "Resolved path");
        Ok((parent, info))
    }

    /// Resolve the directory holding `path` and return it with the last
    /// path component.
    async fn resolve_parent(&self, path: &str) -> Result<(FileInfo, String)> {
        let absolute = self.absolute(path)?;
        let (dir, name) = split_last(&absolute)
            .ok_or_else(|| MfsError::InvalidPath(path.to_string()))?;
        let (_, parent) = self.resolve(dir).await?;
        if !parent.is_dir() {
            return Err(MfsError::NotADirectory(dir.to_string()));
        }
        Ok((parent, name.to_string()))
    }

    /// Starting inode and remaining components for `path`.
    ///
    /// Relative paths that stay below the working directory start from its
    /// inode; anything climbing above it is resolved from the root.
    fn start_point(&self, path: &str) -> Result<(u32, Vec<String>)> {
        check_path(path)?;
        let cleaned = clean_path(path);
        if !cleaned.starts_with('/') && !cleaned.starts_with("..") {
            let inode = self.cwd.lock().inode;
            return Ok((inode, components(&cleaned)));
        }
        let absolute = self.absolute(path)?;
        Ok((MFS_ROOT_ID, components(&absolute)))
    }

    /// `path` as a cleaned absolute path.
    fn absolute(&self, path: &str) -> Result<String> {
        check_path(path)?;
        if path.starts_with('/') {
            return Ok(clean_path(path));
        }
        let cwd = self.cwd.lock().path.clone();
        let joined = clean_path(&format!("{}/{}", cwd, path));
        check_path(&joined)?;
        Ok(joined)
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.len() >= MFS_PATH_MAX {
        return Err(MfsError::InvalidPath(format!(
            "path of {} bytes exceeds {}",
            path.len(),
            MFS_PATH_MAX - 1
        )));
    }
    Ok(())
}

fn components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}

/// Lexically normalize a slash-separated path.
///
/// Repeated separators and `.` vanish, `..` removes the preceding component
/// and cannot climb above `/`. An empty result is `.`.
pub(crate) fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match out.last() {
                Some(&last) if last != ".." => {
                    out.pop();
                }
                _ if rooted => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }

    let joined = out.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Split a cleaned absolute path into its directory and final component.
fn split_last(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind('/')?;
    let name = &path[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let dir = if idx == 0 { "/" } else { &path[..idx] };
    Some((dir, name))
}
