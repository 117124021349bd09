//! Directory quotas.

use super::reply::Reply;
use super::{check_inode, MasterClient};
use crate::error::Result;
use crate::observability;
use crate::protocol::{pack_command, Unpacker, CLTOMA_FUSE_QUOTACONTROL, CLTOMA_QUOTA_INFO};
use crate::units::{format_bytes, Unit};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// `qflags` value selecting every quota dimension.
const ALL_QUOTA_FLAGS: u8 = 0xFF;
/// Full quota control reply.
const QUOTA_REPLY_LEN: usize = 93;
/// Fixed part of a quota listing entry after its path.
const QUOTA_ENTRY_TAIL_LEN: usize = 94;

/// Limits or usage along each quota dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub inodes: u32,
    pub length: u64,
    pub size: u64,
    pub real_size: u64,
}

impl QuotaLimits {
    fn decode(u: &mut Unpacker<'_>) -> Result<Self> {
        Ok(Self {
            inodes: u.u32()?,
            length: u.u64()?,
            size: u.u64()?,
            real_size: u.u64()?,
        })
    }
}

/// Quota of one directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub inode: u32,
    pub flags: u8,
    pub grace_period: u32,
    pub soft: QuotaLimits,
    pub hard: QuotaLimits,
    pub current: QuotaLimits,
}

/// The most consumed soft limit, formatted for display.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaUsage {
    pub current: String,
    pub limit: String,
    pub ratio: f64,
}

impl QuotaInfo {
    /// Usage against the tightest soft limit among length, size and inodes.
    pub fn usage(&self) -> QuotaUsage {
        let mut usage = QuotaUsage {
            current: format_bytes(self.current.length as f64, Unit::Binary),
            limit: format_bytes(self.soft.length as f64, Unit::Binary),
            ratio: 0.0,
        };

        if self.soft.length != 0 {
            usage.ratio = self.current.length as f64 / self.soft.length as f64;
        }

        let candidates = [
            (self.current.size, self.soft.size, Unit::Binary),
            (
                u64::from(self.current.inodes),
                u64::from(self.soft.inodes),
                Unit::Decimal,
            ),
        ];
        for (current, limit, unit) in candidates {
            if limit == 0 {
                continue;
            }
            let ratio = current as f64 / limit as f64;
            if ratio > usage.ratio {
                usage = QuotaUsage {
                    current: format_bytes(current as f64, unit),
                    limit: format_bytes(limit as f64, unit),
                    ratio,
                };
            }
        }
        usage
    }
}

/// What a quota control call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaMode {
    Get,
    Set {
        grace_period: u32,
        soft: QuotaLimits,
        hard: QuotaLimits,
    },
    Delete,
}

/// One entry of the cluster-wide quota listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaEntry {
    pub path: String,
    pub exceeded: bool,
    pub soft_timestamp: u32,
    pub quota: QuotaInfo,
}

impl MasterClient {
    /// Get, set or delete the quota on directory `inode`.
    ///
    /// Returns `None` when the master answers with a bare OK status: no quota
    /// is set on a get, or the record was not echoed on a set or delete.
    pub async fn quota_control(&self, inode: u32, mode: QuotaMode) -> Result<Option<QuotaInfo>> {
        check_inode(inode)?;
        self.require_session("quotacontrol")?;

        let frame = match mode {
            QuotaMode::Get => pack_command(CLTOMA_FUSE_QUOTACONTROL, &[&0u32, &inode, &0u8]),
            QuotaMode::Delete => {
                pack_command(CLTOMA_FUSE_QUOTACONTROL, &[&0u32, &inode, &ALL_QUOTA_FLAGS])
            }
            QuotaMode::Set {
                grace_period,
                soft,
                hard,
            } => pack_command(
                CLTOMA_FUSE_QUOTACONTROL,
                &[
                    &0u32,
                    &inode,
                    &ALL_QUOTA_FLAGS,
                    &grace_period,
                    &soft.inodes,
                    &soft.length,
                    &soft.size,
                    &soft.real_size,
                    &hard.inodes,
                    &hard.length,
                    &hard.size,
                    &hard.real_size,
                ],
            ),
        };

        let buf = self.call("quotacontrol", frame).await?;
        let info = decode_quota_reply(inode, Reply::parse("quotacontrol", buf)?)?;
        if let Some(info) = &info {
            debug!(inode, ratio = info.usage().ratio, "Quota control done");
        }
        Ok(info)
    }

    pub async fn quota_get(&self, inode: u32) -> Result<Option<QuotaInfo>> {
        self.quota_control(inode, QuotaMode::Get).await
    }

    pub async fn quota_set(
        &self,
        inode: u32,
        grace_period: u32,
        soft: QuotaLimits,
        hard: QuotaLimits,
    ) -> Result<Option<QuotaInfo>> {
        self.quota_control(
            inode,
            QuotaMode::Set {
                grace_period,
                soft,
                hard,
            },
        )
        .await
    }

    pub async fn quota_delete(&self, inode: u32) -> Result<Option<QuotaInfo>> {
        self.quota_control(inode, QuotaMode::Delete).await
    }

    /// List every quota defined on the cluster.
    pub async fn quota_info(&self) -> Result<Vec<QuotaEntry>> {
        self.require_session("quota_info")?;
        let frame = pack_command(CLTOMA_QUOTA_INFO, &[]);
        let buf = self.call("quota_info", frame).await?;
        let entries = decode_quota_listing(&buf)?;
        debug!(count = entries.len(), "Quota listing received");
        Ok(entries)
    }
}

/// Decode a quota control reply. A bare OK status means no record was sent,
/// which is how the master answers a get on a directory without a quota.
fn decode_quota_reply(inode: u32, reply: Reply) -> Result<Option<QuotaInfo>> {
    let buf = match reply {
        Reply::Status(code) => {
            Reply::Status(code).into_status("quotacontrol")?;
            return Ok(None);
        }
        reply => reply.into_data("quotacontrol", QUOTA_REPLY_LEN)?,
    };

    let mut u = Unpacker::new("quotacontrol", &buf);
    u.skip(4)?;
    Ok(Some(QuotaInfo {
        inode,
        flags: u.u8()?,
        grace_period: u.u32()?,
        soft: QuotaLimits::decode(&mut u)?,
        hard: QuotaLimits::decode(&mut u)?,
        current: QuotaLimits::decode(&mut u)?,
    }))
}

/// Decode a quota listing: a time limit, then one entry per quota.
fn decode_quota_listing(buf: &[u8]) -> Result<Vec<QuotaEntry>> {
    let mut u = Unpacker::new("quota_info", buf);
    let mut entries = Vec::new();
    if u.remaining() < 4 {
        return Ok(entries);
    }
    let _time_limit = u.u32()?;

    while u.remaining() > 8 + QUOTA_ENTRY_TAIL_LEN {
        let inode = u.u32()?;
        let path_len = u.u32()? as usize;
        let path = u.string(path_len)?;
        let grace_period = u.u32()?;
        let exceeded = u.u8()? != 0;
        let flags = u.u8()?;
        let soft_timestamp = u.u32()?;
        let quota = QuotaInfo {
            inode,
            flags,
            grace_period,
            soft: QuotaLimits::decode(&mut u)?,
            hard: QuotaLimits::decode(&mut u)?,
            current: QuotaLimits::decode(&mut u)?,
        };
        entries.push(QuotaEntry {
            path,
            exceeded,
            soft_timestamp,
            quota,
        });
    }
    Ok(entries)
}
