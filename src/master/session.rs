//! Version negotiation and session registration.

use super::{exchange, MasterClient, MasterInner};
use crate::error::{MfsError, Result};
use crate::observability;
use crate::protocol::status::STATUS_OK;
use crate::protocol::{
    pack_command, Unpacker, ANTOAN_GET_VERSION, CLTOMA_FUSE_REGISTER, FUSE_REGISTER_BLOB_ACL,
    REGISTER_CLOSESESSION, REGISTER_GETRANDOM, REGISTER_NEWSESSION, REGISTER_RECONNECT,
};
use crate::transport::TransportGuard;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Smallest reply that carries a new session.
const SESSION_REPLY_LEN: usize = 43;

/// Limits the master attaches to a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub meta_id: u64,
    pub flags: u8,
    pub root_uid: u32,
    pub root_gid: u32,
    pub map_all_uid: u32,
    pub map_all_gid: u32,
    pub min_goal: u8,
    pub max_goal: u8,
    pub min_trash_time: u32,
    pub max_trash_time: u32,
}

impl SessionParams {
    /// Decode a registration reply into the session id and its parameters.
    fn decode(buf: &[u8]) -> Result<(u32, Self)> {
        let mut u = Unpacker::new("register", buf);
        let _version = u.u32()?;
        let session_id = u.u32()?;
        let params = Self {
            meta_id: u.u64()?,
            flags: u.u8()?,
            root_uid: u.u32()?,
            root_gid: u.u32()?,
            map_all_uid: u.u32()?,
            map_all_gid: u.u32()?,
            min_goal: u.u8()?,
            max_goal: u.u8()?,
            min_trash_time: u.u32()?,
            max_trash_time: u.u32()?,
        };
        Ok((session_id, params))
    }
}

/// Hash the password with the master's 32-byte challenge.
pub(crate) fn derive_password(challenge: &[u8; 32], password: &str) -> [u8; 16] {
    let digest = md5::compute(password.as_bytes());
    let mut ctx = md5::Context::new();
    ctx.consume(&challenge[..16]);
    ctx.consume(digest.0);
    ctx.consume(&challenge[16..]);
    ctx.compute().0
}

/// Interpret a one-byte registration status.
fn status_byte(op: &'static str, reply: &[u8]) -> Result<()> {
    match reply {
        [STATUS_OK] => Ok(()),
        [code] => Err(MfsError::status(op, *code)),
        _ => Err(MfsError::protocol(
            op,
            format!("expected a status byte, got {} bytes", reply.len()),
        )),
    }
}

impl MasterClient {
    /// Register a new session, or re-attach the current one.
    pub async fn create_session(&self) -> Result<u32> {
        observability::record_master_rpc("register");
        let mut guard = self.inner.transport.lock().await;

        let result = async {
            if guard.connect().await? {
                self.inner.negotiate_version(&mut guard).await?;
            }
            self.inner.register(&mut guard).await
        }
        .await;

        if let Err(e) = &result {
            observability::record_master_error("register");
            warn!(master = %guard.peer(), error = %e, "Session registration failed");
            // The next attempt must dial again and re-check the version.
            guard.close();
        }
        result
    }

    /// Tell the master to drop the current session.
    pub async fn close_session(&self) -> Result<()> {
        let session_id = self.session_id();
        if session_id == 0 {
            return Ok(());
        }

        observability::record_master_rpc("close_session");
        let mut guard = self.inner.transport.lock().await;
        let result = async {
            guard.connect().await?;
            close_session_with(&mut guard, session_id).await
        }
        .await;

        match result {
            Ok(()) => {
                let mut state = self.inner.state.lock();
                state.session_id = 0;
                state.params = None;
                info!(session_id, "Session closed");
                Ok(())
            }
            Err(e) => {
                observability::record_master_error("close_session");
                Err(e)
            }
        }
    }
}

impl MasterInner {
    /// Ask for the master version and record it for this connection.
    pub(super) async fn negotiate_version(&self, guard: &mut TransportGuard<'_>) -> Result<Version> {
        let frame = pack_command(ANTOAN_GET_VERSION, &[]);
        let reply = exchange(guard, "get_version", &frame).await?;
        let version = Version::from_wire(Unpacker::new("get_version", &reply).u32()?);
        version.check_master()?;

        self.state.lock().version = version;
        debug!(master = %guard.peer(), %version, "Negotiated master version");
        Ok(version)
    }

    /// Register over `guard`: a new session when none exists, otherwise a
    /// reconnect of the current one.
    pub(super) async fn register(&self, guard: &mut TransportGuard<'_>) -> Result<u32> {
        let (session_id, version) = {
            let state = self.state.lock();
            (state.session_id, state.version)
        };

        let reply = if session_id == 0 {
            let password = self.challenge(guard).await?;
            let root_label = self.config.root_label.as_str();
            let subdir = format!("{}\0", self.config.subdir);
            let frame = pack_command(
                CLTOMA_FUSE_REGISTER,
                &[
                    &FUSE_REGISTER_BLOB_ACL,
                    &REGISTER_NEWSESSION,
                    &version,
                    &(root_label.len() as i32),
                    &root_label,
                    &(subdir.len() as i32),
                    &subdir,
                    &password,
                ],
            );
            exchange(guard, "register", &frame).await?
        } else {
            let frame = pack_command(
                CLTOMA_FUSE_REGISTER,
                &[
                    &FUSE_REGISTER_BLOB_ACL,
                    &REGISTER_RECONNECT,
                    &session_id,
                    &version,
                ],
            );
            exchange(guard, "register", &frame).await?
        };

        if reply.len() == 1 {
            status_byte("register", &reply)?;
            if session_id != 0 {
                debug!(session_id, "Session re-attached");
                return Ok(session_id);
            }
        }

        if reply.len() < SESSION_REPLY_LEN {
            return Err(MfsError::protocol(
                "register",
                format!(
                    "reply of {} bytes, expected at least {}",
                    reply.len(),
                    SESSION_REPLY_LEN
                ),
            ));
        }
        let (new_id, params) = SessionParams::decode(&reply)?;

        if session_id != 0 && session_id != new_id {
            if let Err(e) = close_session_with(guard, session_id).await {
                warn!(session_id, error = %e, "Failed to close replaced session");
            }
        }

        {
            let mut state = self.state.lock();
            state.session_id = new_id;
            state.params = Some(params);
        }
        info!(session_id = new_id, master = %guard.peer(), "Session established");
        Ok(new_id)
    }

    /// Run the password challenge. Without a password, or when the challenge
    /// cannot be completed, the derived password is all zeros.
    async fn challenge(&self, guard: &mut TransportGuard<'_>) -> Result<[u8; 16]> {
        let Some(password) = self.config.password() else {
            return Ok([0u8; 16]);
        };

        let frame = pack_command(
            CLTOMA_FUSE_REGISTER,
            &[&FUSE_REGISTER_BLOB_ACL, &REGISTER_GETRANDOM],
        );
        match exchange(guard, "register", &frame).await {
            Ok(reply) => match <&[u8; 32]>::try_from(reply.as_slice()) {
                Ok(challenge) => return Ok(derive_password(challenge, password)),
                Err(_) => warn!(len = reply.len(), "Unexpected challenge length"),
            },
            Err(e) => warn!(error = %e, "Password challenge failed"),
        }

        // A failed exchange drops the connection.
        if guard.connect().await? {
            self.negotiate_version(guard).await?;
        }
        Ok([0u8; 16])
    }
}

async fn close_session_with(guard: &mut TransportGuard<'_>, session_id: u32) -> Result<()> {
    let frame = pack_command(
        CLTOMA_FUSE_REGISTER,
        &[&FUSE_REGISTER_BLOB_ACL, &REGISTER_CLOSESESSION, &session_id],
    );
    let reply = exchange(guard, "close_session", &frame).await?;
    status_byte("close_session", &reply)
}
