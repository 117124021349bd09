//! Metadata operations.
//!
//! Every request starts with a zero query id, and every identity triple is
//! sent as `uid, 1, gid` (a single supplementary group). All of them need a
//! registered session and are refused locally without one.

use super::attr::{FileInfo, FileType};
use super::reply::Reply;
use super::{check_inode, check_name, MasterClient};
use crate::chunk::ChunkLocation;
use crate::error::{MfsError, Result};
use crate::protocol::{
    pack_command, Unpacker, CLTOMA_FUSE_ACCESS, CLTOMA_FUSE_CREATE, CLTOMA_FUSE_GETATTR,
    CLTOMA_FUSE_GETDIRSTATS, CLTOMA_FUSE_LINK, CLTOMA_FUSE_LOOKUP, CLTOMA_FUSE_MKDIR,
    CLTOMA_FUSE_MKNOD, CLTOMA_FUSE_OPEN, CLTOMA_FUSE_PURGE, CLTOMA_FUSE_READDIR,
    CLTOMA_FUSE_READLINK, CLTOMA_FUSE_READ_CHUNK, CLTOMA_FUSE_RENAME, CLTOMA_FUSE_RMDIR,
    CLTOMA_FUSE_SETATTR, CLTOMA_FUSE_STATFS, CLTOMA_FUSE_SYMLINK, CLTOMA_FUSE_TRUNCATE,
    CLTOMA_FUSE_UNDEL, CLTOMA_FUSE_UNLINK, CLTOMA_FUSE_WRITE_CHUNK, CLTOMA_FUSE_WRITE_CHUNK_END,
    MFS_SYMLINK_MAX, SET_ATIME_FLAG, SET_GID_FLAG, SET_MODE_FLAG, SET_MTIME_FLAG, SET_UID_FLAG,
};
use serde::{Deserialize, Serialize};

/// Group count sent with every identity.
const GROUPS: u32 = 1;

/// Smallest reply carrying an inode and an attribute record.
const ENTRY_REPLY_LEN: usize = 4 + 4 + FileInfo::BASE_LEN;
/// Smallest reply carrying an attribute record.
const ATTR_REPLY_LEN: usize = 4 + FileInfo::BASE_LEN;
/// Offset of the first directory entry: query id and the echoed edge id.
const READDIR_HEADER_LEN: usize = 12;

const MAX_ENTRIES: u32 = 0xFFFF;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub inode: u32,
    pub file_type: FileType,
    /// Present when listed with attributes.
    pub attr: Option<FileInfo>,
}

/// Recursive usage of a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirStats {
    pub inodes: u32,
    pub dirs: u32,
    pub files: u32,
    pub chunks: u32,
    pub length: u64,
    pub size: u64,
    pub real_size: u64,
}

/// Cluster-wide space figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatInfo {
    pub total_space: u64,
    pub avail_space: u64,
    pub trash_space: u64,
    pub sustained_space: u64,
    pub inodes: u32,
}

/// Attribute update; only the fields named in `mask` are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mask: u8,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
}

impl SetAttr {
    pub fn mode(mode: u16) -> Self {
        Self {
            mask: SET_MODE_FLAG,
            mode,
            ..Default::default()
        }
    }

    pub fn owner(uid: u32, gid: u32) -> Self {
        Self {
            mask: SET_UID_FLAG | SET_GID_FLAG,
            uid,
            gid,
            ..Default::default()
        }
    }

    pub fn times(atime: u32, mtime: u32) -> Self {
        Self {
            mask: SET_ATIME_FLAG | SET_MTIME_FLAG,
            atime,
            mtime,
            ..Default::default()
        }
    }
}

impl MasterClient {
    /// Send a metadata request that needs a session.
    async fn rpc(&self, op: &'static str, frame: Vec<u8>) -> Result<Reply> {
        self.require_session(op)?;
        let buf = self.call(op, frame).await?;
        Reply::parse(op, buf)
    }

    fn identity(&self) -> (u32, u32) {
        let config = self.config();
        (config.uid, config.gid)
    }

    /// Resolve `name` in directory `parent`.
    pub async fn lookup(&self, parent: u32, name: &str) -> Result<FileInfo> {
        check_inode(parent)?;
        check_name(name)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_LOOKUP,
            &[&0u32, &parent, &(name.len() as u8), &name, &uid, &GROUPS, &gid],
        );
        let reply = self.rpc("lookup", frame).await?;
        decode_entry("lookup", reply)
    }

    pub async fn getattr(&self, inode: u32) -> Result<FileInfo> {
        check_inode(inode)?;
        let frame = pack_command(CLTOMA_FUSE_GETATTR, &[&0u32, &inode]);
        let reply = self.rpc("getattr", frame).await?;
        decode_attr("getattr", inode, reply)
    }

    /// Open `inode` with `WANT_READ` / `WANT_WRITE` style flags.
    pub async fn open(&self, inode: u32, flags: u8) -> Result<FileInfo> {
        check_inode(inode)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_OPEN,
            &[&0u32, &inode, &uid, &GROUPS, &gid, &flags],
        );
        let reply = self.rpc("open", frame).await?;
        decode_attr("open", inode, reply)
    }

    pub async fn mkdir(&self, parent: u32, name: &str, mode: u16) -> Result<FileInfo> {
        check_inode(parent)?;
        check_name(name)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_MKDIR,
            &[
                &0u32,
                &parent,
                &(name.len() as u8),
                &name,
                &mode,
                &0u16,
                &uid,
                &GROUPS,
                &gid,
                &0u8,
            ],
        );
        let reply = self.rpc("mkdir", frame).await?;
        decode_entry("mkdir", reply)
    }

    /// Create a special node (fifo, socket, device) or a plain file.
    pub async fn mknod(
        &self,
        parent: u32,
        name: &str,
        file_type: FileType,
        mode: u16,
        rdev: u32,
    ) -> Result<FileInfo> {
        check_inode(parent)?;
        check_name(name)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_MKNOD,
            &[
                &0u32,
                &parent,
                &(name.len() as u8),
                &name,
                &file_type.to_wire(),
                &mode,
                &0u16,
                &uid,
                &GROUPS,
                &gid,
                &rdev,
            ],
        );
        let reply = self.rpc("mknod", frame).await?;
        decode_entry("mknod", reply)
    }

    /// Create and open a regular file.
    pub async fn create(&self, parent: u32, name: &str, mode: u16) -> Result<FileInfo> {
        check_inode(parent)?;
        check_name(name)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_CREATE,
            &[
                &0u32,
                &parent,
                &(name.len() as u8),
                &name,
                &mode,
                &0u16,
                &uid,
                &GROUPS,
                &gid,
            ],
        );
        let reply = self.rpc("create", frame).await?;
        decode_entry("create", reply)
    }

    pub async fn unlink(&self, parent: u32, name: &str) -> Result<()> {
        self.remove_entry("unlink", CLTOMA_FUSE_UNLINK, parent, name)
            .await
    }

    pub async fn rmdir(&self, parent: u32, name: &str) -> Result<()> {
        self.remove_entry("rmdir", CLTOMA_FUSE_RMDIR, parent, name)
            .await
    }

    async fn remove_entry(&self, op: &'static str, cmd: u32, parent: u32, name: &str) -> Result<()> {
        check_inode(parent)?;
        check_name(name)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            cmd,
            &[&0u32, &parent, &(name.len() as u8), &name, &uid, &GROUPS, &gid],
        );
        self.rpc(op, frame).await?.into_status(op)
    }

    /// Move `src_name` in `src_parent` to `dst_name` in `dst_parent`.
    pub async fn rename(
        &self,
        src_parent: u32,
        src_name: &str,
        dst_parent: u32,
        dst_name: &str,
    ) -> Result<FileInfo> {
        check_inode(src_parent)?;
        check_inode(dst_parent)?;
        check_name(src_name)?;
        check_name(dst_name)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_RENAME,
            &[
                &0u32,
                &src_parent,
                &(src_name.len() as u8),
                &src_name,
                &dst_parent,
                &(dst_name.len() as u8),
                &dst_name,
                &uid,
                &GROUPS,
                &gid,
            ],
        );
        let reply = self.rpc("rename", frame).await?;
        decode_entry("rename", reply)
    }

    /// Hard link `inode` as `name` in `parent`.
    pub async fn link(&self, inode: u32, parent: u32, name: &str) -> Result<FileInfo> {
        check_inode(inode)?;
        check_inode(parent)?;
        check_name(name)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_LINK,
            &[
                &0u32,
                &inode,
                &parent,
                &(name.len() as u8),
                &name,
                &uid,
                &GROUPS,
                &gid,
            ],
        );
        let reply = self.rpc("link", frame).await?;
        decode_entry("link", reply)
    }

    pub async fn symlink(&self, parent: u32, name: &str, target: &str) -> Result<FileInfo> {
        check_inode(parent)?;
        check_name(name)?;
        if target.len() > MFS_SYMLINK_MAX {
            return Err(MfsError::NameTooLong(target.to_string()));
        }
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_SYMLINK,
            &[
                &0u32,
                &parent,
                &(name.len() as u8),
                &name,
                &(target.len() as u32),
                &target,
                &uid,
                &GROUPS,
                &gid,
            ],
        );
        let reply = self.rpc("symlink", frame).await?;
        decode_entry("symlink", reply)
    }

    pub async fn readlink(&self, inode: u32) -> Result<String> {
        check_inode(inode)?;
        let frame = pack_command(CLTOMA_FUSE_READLINK, &[&0u32, &inode]);
        let buf = self.rpc("readlink", frame).await?.into_data("readlink", 8)?;

        let mut u = Unpacker::new("readlink", &buf);
        u.skip(4)?;
        let len = u.u32()? as usize;
        if buf.len() != len + 8 {
            return Err(MfsError::protocol(
                "readlink",
                format!("path length {} does not match reply of {} bytes", len, buf.len()),
            ));
        }
        let path = u.bytes(len)?;
        // The master may include the terminating NUL.
        let path = path.strip_suffix(b"\0").unwrap_or(path);
        Ok(String::from_utf8_lossy(path).into_owned())
    }

    /// List a directory, with entry types only.
    pub async fn readdir(&self, inode: u32) -> Result<Vec<DirEntry>> {
        self.list_dir(inode, false).await
    }

    /// List a directory with full attributes for every entry.
    pub async fn readdir_with_attrs(&self, inode: u32) -> Result<Vec<DirEntry>> {
        self.list_dir(inode, true).await
    }

    async fn list_dir(&self, inode: u32, with_attrs: bool) -> Result<Vec<DirEntry>> {
        check_inode(inode)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_READDIR,
            &[
                &0u32,
                &inode,
                &uid,
                &GROUPS,
                &gid,
                &u8::from(with_attrs),
                &MAX_ENTRIES,
                &0u64,
            ],
        );
        let min_len = if with_attrs { 79 } else { 27 };
        let buf = self
            .rpc("readdir", frame)
            .await?
            .into_data("readdir", min_len)?;
        decode_dir_entries(&buf, with_attrs)
    }

    pub async fn setattr(&self, inode: u32, attr: SetAttr) -> Result<FileInfo> {
        check_inode(inode)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_SETATTR,
            &[
                &0u32,
                &inode,
                &0u8,
                &uid,
                &GROUPS,
                &gid,
                &attr.mask,
                &attr.mode,
                &attr.uid,
                &attr.gid,
                &attr.atime,
                &attr.mtime,
                &0u8,
            ],
        );
        let reply = self.rpc("setattr", frame).await?;
        decode_attr("setattr", inode, reply)
    }

    pub async fn chmod(&self, inode: u32, mode: u16) -> Result<FileInfo> {
        self.setattr(inode, SetAttr::mode(mode)).await
    }

    pub async fn chown(&self, inode: u32, uid: u32, gid: u32) -> Result<FileInfo> {
        self.setattr(inode, SetAttr::owner(uid, gid)).await
    }

    /// Set the length of `inode`.
    pub async fn truncate(&self, inode: u32, flags: u8, length: u64) -> Result<FileInfo> {
        check_inode(inode)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_TRUNCATE,
            &[&0u32, &inode, &flags, &uid, &GROUPS, &gid, &length],
        );
        let reply = self.rpc("truncate", frame).await?;
        decode_attr("truncate", inode, reply)
    }

    /// Restore a node from trash.
    pub async fn undelete(&self, inode: u32) -> Result<()> {
        check_inode(inode)?;
        let frame = pack_command(CLTOMA_FUSE_UNDEL, &[&0u32, &inode]);
        self.rpc("undel", frame).await?.into_status("undel")
    }

    /// Remove a node from trash for good.
    pub async fn purge(&self, inode: u32) -> Result<()> {
        check_inode(inode)?;
        let frame = pack_command(CLTOMA_FUSE_PURGE, &[&0u32, &inode]);
        self.rpc("purge", frame).await?.into_status("purge")
    }

    /// Check `mode` access (`R_OK`-style bits) for the configured identity.
    pub async fn access(&self, inode: u32, mode: u16) -> Result<()> {
        check_inode(inode)?;
        let (uid, gid) = self.identity();
        let frame = pack_command(
            CLTOMA_FUSE_ACCESS,
            &[&0u32, &inode, &uid, &GROUPS, &gid, &mode],
        );
        self.rpc("access", frame).await?.into_status("access")
    }

    pub async fn statfs(&self) -> Result<StatInfo> {
        let frame = pack_command(CLTOMA_FUSE_STATFS, &[&0u32]);
        let buf = self.rpc("statfs", frame).await?.into_data("statfs", 40)?;

        let mut u = Unpacker::new("statfs", &buf);
        u.skip(4)?;
        Ok(StatInfo {
            total_space: u.u64()?,
            avail_space: u.u64()?,
            trash_space: u.u64()?,
            sustained_space: u.u64()?,
            inodes: u.u32()?,
        })
    }

    pub async fn dir_stats(&self, inode: u32) -> Result<DirStats> {
        check_inode(inode)?;
        let frame = pack_command(CLTOMA_FUSE_GETDIRSTATS, &[&0u32, &inode]);
        let buf = self
            .rpc("getdirstats", frame)
            .await?
            .into_data("getdirstats", 60)?;
        decode_dir_stats(&buf)
    }

    /// Locate chunk `index` of `inode` for reading.
    pub async fn read_chunk(&self, inode: u32, index: u32, flags: u8) -> Result<ChunkLocation> {
        self.chunk_location("read_chunk", CLTOMA_FUSE_READ_CHUNK, inode, index, flags)
            .await
    }

    /// Locate chunk `index` of `inode` for writing, creating it if needed.
    pub async fn write_chunk(&self, inode: u32, index: u32, flags: u8) -> Result<ChunkLocation> {
        self.chunk_location("write_chunk", CLTOMA_FUSE_WRITE_CHUNK, inode, index, flags)
            .await
    }

    async fn chunk_location(
        &self,
        op: &'static str,
        cmd: u32,
        inode: u32,
        index: u32,
        flags: u8,
    ) -> Result<ChunkLocation> {
        check_inode(inode)?;
        let frame = pack_command(cmd, &[&0u32, &inode, &index, &flags]);
        let buf = self
            .rpc(op, frame)
            .await?
            .into_data(op, ChunkLocation::MIN_REPLY_LEN)?;
        ChunkLocation::decode(op, &buf)
    }

    /// Finish a chunk write and publish the new file `length`.
    pub async fn write_chunk_end(
        &self,
        chunk_id: u64,
        inode: u32,
        index: u32,
        length: u64,
        flags: u8,
    ) -> Result<()> {
        check_inode(inode)?;
        let frame = pack_command(
            CLTOMA_FUSE_WRITE_CHUNK_END,
            &[&0u32, &chunk_id, &inode, &index, &length, &flags],
        );
        self.rpc("write_chunk_end", frame)
            .await?
            .into_status("write_chunk_end")
    }
}

fn decode_entry(op: &'static str, reply: Reply) -> Result<FileInfo> {
    let buf = reply.into_data(op, ENTRY_REPLY_LEN)?;
    let mut u = Unpacker::new(op, &buf);
    u.skip(4)?;
    let inode = u.u32()?;
    FileInfo::decode(inode, &mut u)
}

fn decode_attr(op: &'static str, inode: u32, reply: Reply) -> Result<FileInfo> {
    let buf = reply.into_data(op, ATTR_REPLY_LEN)?;
    let mut u = Unpacker::new(op, &buf);
    u.skip(4)?;
    FileInfo::decode(inode, &mut u)
}

fn decode_dir_entries(buf: &[u8], with_attrs: bool) -> Result<Vec<DirEntry>> {
    let mut u = Unpacker::new("readdir", buf);
    u.skip(READDIR_HEADER_LEN)?;

    let mut entries = Vec::new();
    while !u.is_empty() {
        let name_len = u.u8()? as usize;
        let name = u.string(name_len)?;
        let inode = u.u32()?;
        let entry = if with_attrs {
            let attr = FileInfo::decode(inode, &mut u)?;
            DirEntry {
                name,
                inode,
                file_type: attr.file_type,
                attr: Some(attr),
            }
        } else {
            DirEntry {
                name,
                inode,
                file_type: FileType::decode("readdir", u.u8()?)?,
                attr: None,
            }
        };
        entries.push(entry);
    }
    Ok(entries)
}

fn decode_dir_stats(buf: &[u8]) -> Result<DirStats> {
    let mut u = Unpacker::new("getdirstats", buf);
    u.skip(4)?;
    let inodes = u.u32()?;
    let dirs = u.u32()?;
    let files = u.u32()?;
    u.skip(8)?;
    let chunks = u.u32()?;
    u.skip(8)?;
    Ok(DirStats {
        inodes,
        dirs,
        files,
        chunks,
        length: u.u64()?,
        size: u.u64()?,
        real_size: u.u64()?,
    })
}
