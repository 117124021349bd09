//! File attribute records.
//!
//! Every metadata reply that describes a node carries the same record:
//!
//! ```text
//! flags:8 mode:16 uid:32 gid:32 atime:32 mtime:32 ctime:32 nlink:32 [extra]
//! ```
//!
//! The node type lives in the top four bits of `mode`. The trailing field
//! depends on it: a 64-bit length for regular files, directories, symlinks
//! and trash/sustained entries, a 32-bit device number for block and
//! character devices, and nothing for fifos and sockets.

use crate::error::{MfsError, Result};
use crate::protocol::Unpacker;
use crate::units::format_dir_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node type as encoded in the mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Fifo,
    BlockDevice,
    CharDevice,
    Socket,
    Trash,
    Sustained,
}

impl FileType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(FileType::File),
            2 => Some(FileType::Directory),
            3 => Some(FileType::Symlink),
            4 => Some(FileType::Fifo),
            5 => Some(FileType::BlockDevice),
            6 => Some(FileType::CharDevice),
            7 => Some(FileType::Socket),
            8 => Some(FileType::Trash),
            9 => Some(FileType::Sustained),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            FileType::File => 1,
            FileType::Directory => 2,
            FileType::Symlink => 3,
            FileType::Fifo => 4,
            FileType::BlockDevice => 5,
            FileType::CharDevice => 6,
            FileType::Socket => 7,
            FileType::Trash => 8,
            FileType::Sustained => 9,
        }
    }

    /// Decode a wire type, rejecting unknown values.
    pub(crate) fn decode(op: &'static str, value: u8) -> Result<Self> {
        Self::from_wire(value)
            .ok_or_else(|| MfsError::protocol(op, format!("unknown file type {}", value)))
    }

    /// Character used in `ls -l` style listings.
    pub fn symbol(self) -> char {
        match self {
            FileType::File => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::Fifo => 'p',
            FileType::BlockDevice => 'b',
            FileType::CharDevice => 'c',
            FileType::Socket => 's',
            FileType::Trash => 't',
            FileType::Sustained => 'r',
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::File => "file",
            FileType::Directory => "directory",
            FileType::Symlink => "symlink",
            FileType::Fifo => "fifo",
            FileType::BlockDevice => "block device",
            FileType::CharDevice => "char device",
            FileType::Socket => "socket",
            FileType::Trash => "trash",
            FileType::Sustained => "sustained",
        };
        f.write_str(name)
    }
}

/// Type-dependent trailing field of an attribute record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrExtra {
    Length(u64),
    Device(u32),
    None,
}

/// Attributes of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub inode: u32,
    pub flags: u8,
    pub file_type: FileType,
    /// Permission bits, the low twelve bits of the wire mode.
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub nlink: u32,
    pub extra: AttrExtra,
}

impl FileInfo {
    /// Length of the fixed part of the record.
    pub const BASE_LEN: usize = 27;

    /// Decode a record at the unpacker's position.
    pub fn decode(inode: u32, u: &mut Unpacker<'_>) -> Result<Self> {
        let flags = u.u8()?;
        let raw_mode = u.u16()?;
        let uid = u.u32()?;
        let gid = u.u32()?;
        let atime = u.u32()?;
        let mtime = u.u32()?;
        let ctime = u.u32()?;
        let nlink = u.u32()?;

        let file_type = FileType::decode(u.op(), (raw_mode >> 12) as u8)?;
        let extra = match file_type {
            FileType::File
            | FileType::Directory
            | FileType::Symlink
            | FileType::Trash
            | FileType::Sustained => AttrExtra::Length(u.u64()?),
            FileType::BlockDevice | FileType::CharDevice => AttrExtra::Device(u.u32()?),
            FileType::Fifo | FileType::Socket => AttrExtra::None,
        };

        Ok(Self {
            inode,
            flags,
            file_type,
            mode: raw_mode & 0x0FFF,
            uid,
            gid,
            atime,
            mtime,
            ctime,
            nlink,
            extra,
        })
    }

    /// Length in bytes, zero for nodes without one.
    pub fn size(&self) -> u64 {
        match self.extra {
            AttrExtra::Length(len) => len,
            _ => 0,
        }
    }

    pub fn rdev(&self) -> Option<u32> {
        match self.extra {
            AttrExtra::Device(dev) => Some(dev),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn atime_utc(&self) -> DateTime<Utc> {
        timestamp(self.atime)
    }

    pub fn mtime_utc(&self) -> DateTime<Utc> {
        timestamp(self.mtime)
    }

    pub fn ctime_utc(&self) -> DateTime<Utc> {
        timestamp(self.ctime)
    }

    /// Human readable size. Directory sizes use the master's scaled encoding.
    pub fn display_size(&self) -> String {
        if self.is_dir() {
            format_dir_size(self.size())
        } else {
            self.size().to_string()
        }
    }

    /// `drwxr-xr-x` style mode string.
    pub fn mode_string(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(self.file_type.symbol());
        for shift in [6u16, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}

fn timestamp(secs: u32) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(i64::from(secs), 0).unwrap_or_default()
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.mode_string(),
            self.nlink,
            self.uid,
            self.gid,
            self.display_size(),
            self.mtime_utc().format("%Y-%m-%d %H:%M:%S"),
        )
    }
}
