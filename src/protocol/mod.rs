//! MooseFS wire protocol definitions.
//!
//! Every message on both the master and the chunkserver connections is a
//! big-endian frame:
//!
//! ```text
//! +-----------+-----------+---------------------+
//! | cmd: u32  | size: u32 | payload: size bytes |
//! +-----------+-----------+---------------------+
//! ```
//!
//! A reply uses the request's command id plus one. The peer may interleave a
//! keepalive `ANTOAN_NOP` frame (size 4, four zero bytes) before any reply;
//! readers skip it.

pub mod codec;
pub mod status;

pub use codec::{frame, pack, pack_command, FrameHeader, Pack, Unpacker};

use std::time::Duration;

// Connection behavior
pub const TCP_RETRY_TIMES: u32 = 3;
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const TCP_RW_TIMEOUT: Duration = Duration::from_secs(60);
pub const MASTER_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default master port for client connections.
pub const DEFAULT_MASTER_PORT: u16 = 9421;

// Namespace limits
pub const MFS_ROOT_ID: u32 = 1;
pub const MFS_NAME_MAX: usize = 255;
pub const MFS_SYMLINK_MAX: usize = 4096;
pub const MFS_PATH_MAX: usize = 1024;
/// Inodes at or above this value are reserved by the master.
pub const MIN_SPECIAL_INODE: u32 = 0x7FFF_FFF0;

/// Largest payload accepted from a peer.
pub const MAX_FRAME_SIZE: u32 = 100_000_000;

// Chunk geometry
pub const CHUNK_SIZE: u32 = 0x0400_0000;
pub const CHUNK_MASK: u64 = 0x03FF_FFFF;
pub const CHUNK_BITS: u32 = 26;
pub const BLOCK_SIZE: u32 = 0x1_0000;
pub const BLOCK_MASK: u32 = 0xFFFF;
pub const BLOCK_BITS: u32 = 16;
pub const BLOCKS_IN_CHUNK: u32 = 0x400;
/// CRC of an all-zero block.
pub const CRC_EMPTY: u32 = 0xD797_8EEB;

/// Registration blob carried by every `CLTOMA_FUSE_REGISTER` request.
pub const FUSE_REGISTER_BLOB_ACL: &str =
    "DjI1GAQDULI5d2YjA26ypc3ovkhjvhciTQVx3CS4nYgtBoUcsljiVpsErJENHaw0";

// Registration sub-codes
pub const REGISTER_GETRANDOM: u8 = 1;
pub const REGISTER_NEWSESSION: u8 = 2;
pub const REGISTER_RECONNECT: u8 = 3;
pub const REGISTER_TOOLS: u8 = 4;
pub const REGISTER_NEWMETASESSION: u8 = 5;
pub const REGISTER_CLOSESESSION: u8 = 6;

// Generic commands
pub const ANTOAN_NOP: u32 = 0;
pub const ANTOAN_GET_VERSION: u32 = 10;

// Chunkserver commands
pub const CLTOCS_READ: u32 = 200;
pub const CSTOCL_READ_STATUS: u32 = 201;
pub const CSTOCL_READ_DATA: u32 = 202;
pub const CLTOCS_WRITE: u32 = 210;
pub const CSTOCL_WRITE_STATUS: u32 = 211;
pub const CLTOCS_WRITE_DATA: u32 = 212;
pub const CLTOCS_WRITE_FINISH: u32 = 213;

// Master commands
pub const CLTOMA_FUSE_REGISTER: u32 = 400;
pub const CLTOMA_FUSE_STATFS: u32 = 402;
pub const CLTOMA_FUSE_ACCESS: u32 = 404;
pub const CLTOMA_FUSE_LOOKUP: u32 = 406;
pub const CLTOMA_FUSE_GETATTR: u32 = 408;
pub const CLTOMA_FUSE_SETATTR: u32 = 410;
pub const CLTOMA_FUSE_READLINK: u32 = 412;
pub const CLTOMA_FUSE_SYMLINK: u32 = 414;
pub const CLTOMA_FUSE_MKNOD: u32 = 416;
pub const CLTOMA_FUSE_MKDIR: u32 = 418;
pub const CLTOMA_FUSE_UNLINK: u32 = 420;
pub const CLTOMA_FUSE_RMDIR: u32 = 422;
pub const CLTOMA_FUSE_RENAME: u32 = 424;
pub const CLTOMA_FUSE_LINK: u32 = 426;
pub const CLTOMA_FUSE_READDIR: u32 = 428;
pub const CLTOMA_FUSE_OPEN: u32 = 430;
pub const CLTOMA_FUSE_READ_CHUNK: u32 = 432;
pub const CLTOMA_FUSE_WRITE_CHUNK: u32 = 434;
pub const CLTOMA_FUSE_WRITE_CHUNK_END: u32 = 436;
pub const CLTOMA_FUSE_UNDEL: u32 = 458;
pub const CLTOMA_FUSE_PURGE: u32 = 460;
pub const CLTOMA_FUSE_GETDIRSTATS: u32 = 462;
pub const CLTOMA_FUSE_TRUNCATE: u32 = 464;
pub const CLTOMA_FUSE_QUOTACONTROL: u32 = 476;
pub const CLTOMA_FUSE_CREATE: u32 = 482;
pub const CLTOMA_SESSION_LIST: u32 = 508;
pub const CLTOMA_INFO: u32 = 510;
pub const CLTOMA_QUOTA_INFO: u32 = 518;
pub const CLTOMA_SESSION_COMMAND: u32 = 526;

// Open flags
pub const WANT_READ: u8 = 1;
pub const WANT_WRITE: u8 = 2;

// Setattr mask bits
pub const SET_WINATTR_FLAG: u8 = 1;
pub const SET_MODE_FLAG: u8 = 1 << 1;
pub const SET_UID_FLAG: u8 = 1 << 2;
pub const SET_GID_FLAG: u8 = 1 << 3;
pub const SET_MTIME_NOW_FLAG: u8 = 1 << 4;
pub const SET_MTIME_FLAG: u8 = 1 << 5;
pub const SET_ATIME_FLAG: u8 = 1 << 6;
pub const SET_ATIME_NOW_FLAG: u8 = 1 << 7;

// Chunk operation flags
pub const CHUNKOPFLAG_CANMODTIME: u8 = 1;
pub const CHUNKOPFLAG_CONTINUEOP: u8 = 1 << 1;
pub const CHUNKOPFLAG_CANUSERESERVESPACE: u8 = 1 << 2;

/// The frame a peer sends to keep a connection alive.
pub fn nop_frame() -> Vec<u8> {
    pack_command(ANTOAN_NOP, &[&0u32])
}
