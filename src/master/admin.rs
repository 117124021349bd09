//! Administrative queries.
//!
//! These replies carry no query id and need no session.

use super::MasterClient;
use crate::error::{MfsError, Result};
use crate::protocol::{
    pack_command, Unpacker, CLTOMA_INFO, CLTOMA_SESSION_COMMAND, CLTOMA_SESSION_LIST,
};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::info;

/// Listing format requested from the master.
const SESSION_LIST_VMODE: u8 = 2;
/// Per-session statistics counters in that format.
const SESSION_LIST_STATS: u16 = 16;
const SESSION_LIST_MIN_LEN: usize = 188;
/// Session parameters and both statistics arrays that follow each path.
const SESSION_ENTRY_TAIL_LEN: usize = 27 + 2 * 4 * SESSION_LIST_STATS as usize;

const SESSION_COMMAND_REMOVE: u8 = 0;

const INFO_REPLY_LEN: usize = 121;

/// A client session as listed by the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: u32,
    pub ip: Ipv4Addr,
    pub version: Version,
    pub open_files: u32,
    pub sockets: u8,
    pub expire: u32,
    pub info: String,
    pub path: String,
}

/// Master-wide status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterInfo {
    pub version: Version,
    pub memory_usage: u64,
    pub total_space: u64,
    pub avail_space: u64,
    pub trash_space: u64,
    pub trash_nodes: u32,
    pub sustained_space: u64,
    pub sustained_nodes: u32,
    pub all_nodes: u32,
    pub dir_nodes: u32,
    pub file_nodes: u32,
    pub chunks: u32,
    pub chunk_copies: u32,
    pub meta_version: u64,
}

impl MasterClient {
    /// List the sessions registered on the master.
    pub async fn list_sessions(&self) -> Result<Vec<SessionEntry>> {
        let frame = pack_command(CLTOMA_SESSION_LIST, &[&SESSION_LIST_VMODE]);
        let buf = self.call("session_list", frame).await?;
        decode_session_list(&buf)
    }

    /// Ask the master to drop session `session_id`.
    pub async fn remove_session(&self, session_id: u32) -> Result<()> {
        let frame = pack_command(
            CLTOMA_SESSION_COMMAND,
            &[&SESSION_COMMAND_REMOVE, &session_id],
        );
        let buf = self.call("session_command", frame).await?;
        match buf.first() {
            Some(0) => {
                info!(session_id, "Session removed");
                Ok(())
            }
            Some(code) => Err(MfsError::status("session_command", *code)),
            None => Err(MfsError::protocol("session_command", "empty reply")),
        }
    }

    /// Master status and space summary.
    pub async fn info(&self) -> Result<MasterInfo> {
        let frame = pack_command(CLTOMA_INFO, &[]);
        let buf = self.call("info", frame).await?;
        decode_master_info(&buf)
    }
}

fn decode_session_list(buf: &[u8]) -> Result<Vec<SessionEntry>> {
    if buf.len() <= 2 {
        return Ok(Vec::new());
    }

    let mut u = Unpacker::new("session_list", buf);
    let stats = u.u16()?;
    if stats != SESSION_LIST_STATS {
        return Err(MfsError::protocol(
            "session_list",
            format!("unexpected stats count {}", stats),
        ));
    }
    if buf.len() < SESSION_LIST_MIN_LEN {
        return Err(MfsError::protocol(
            "session_list",
            format!(
                "reply of {} bytes, expected at least {}",
                buf.len(),
                SESSION_LIST_MIN_LEN
            ),
        ));
    }

    let mut sessions = Vec::new();
    while !u.is_empty() {
        let session_id = u.u32()?;
        let ip = Ipv4Addr::from(u.u32()?);
        let version = Version::from_wire(u.u32()?);
        let open_files = u.u32()?;
        let sockets = u.u8()?;
        let expire = u.u32()?;
        let info_len = u.u32()? as usize;
        let info = u.string(info_len)?;
        let path_len = u.u32()? as usize;
        let path = u.string(path_len)?;
        u.skip(SESSION_ENTRY_TAIL_LEN)?;

        sessions.push(SessionEntry {
            session_id,
            ip,
            version,
            open_files,
            sockets,
            expire,
            info,
            path,
        });
    }
    Ok(sessions)
}

fn decode_master_info(buf: &[u8]) -> Result<MasterInfo> {
    if buf.len() < INFO_REPLY_LEN {
        return Err(MfsError::protocol(
            "info",
            format!("reply of {} bytes, expected {}", buf.len(), INFO_REPLY_LEN),
        ));
    }

    let mut u = Unpacker::new("info", buf);
    let version = Version::from_wire(u.u32()?);
    let memory_usage = u.u64()?;
    u.skip(16)?; // cpu usage
    let total_space = u.u64()?;
    let avail_space = u.u64()?;
    let trash_space = u.u64()?;
    let trash_nodes = u.u32()?;
    let sustained_space = u.u64()?;
    let sustained_nodes = u.u32()?;
    let all_nodes = u.u32()?;
    let dir_nodes = u.u32()?;
    let file_nodes = u.u32()?;
    let chunks = u.u32()?;
    let chunk_copies = u.u32()?;
    // Store and leader state.
    u.skip(4 + 4 + 4 + 5 + 4 + 4)?;
    let meta_version = u.u64()?;

    Ok(MasterInfo {
        version,
        memory_usage,
        total_space,
        avail_space,
        trash_space,
        trash_nodes,
        sustained_space,
        sustained_nodes,
        all_nodes,
        dir_nodes,
        file_nodes,
        chunks,
        chunk_copies,
        meta_version,
    })
}
