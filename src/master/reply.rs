//! Shape of a metadata reply.
//!
//! Metadata replies echo the query id (always 0) in their first four bytes.
//! A reply of exactly five bytes carries only a status byte; anything else is
//! the operation's data.

use crate::error::{MfsError, Result};
use crate::protocol::status::STATUS_OK;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Status(u8),
    Data(Vec<u8>),
}

impl Reply {
    pub(crate) fn parse(op: &'static str, buf: Vec<u8>) -> Result<Self> {
        if buf.len() < 4 {
            return Err(MfsError::protocol(
                op,
                format!("reply of {} bytes is shorter than the query id", buf.len()),
            ));
        }
        let query_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if query_id != 0 {
            return Err(MfsError::protocol(op, format!("unexpected query id {}", query_id)));
        }
        if buf.len() == 5 {
            return Ok(Reply::Status(buf[4]));
        }
        Ok(Reply::Data(buf))
    }

    /// The reply data, at least `min_len` bytes long including the query id.
    pub(crate) fn into_data(self, op: &'static str, min_len: usize) -> Result<Vec<u8>> {
        match self {
            Reply::Status(STATUS_OK) => Err(MfsError::protocol(
                op,
                "status-only reply where data was expected",
            )),
            Reply::Status(code) => Err(MfsError::status(op, code)),
            Reply::Data(buf) if buf.len() < min_len => Err(MfsError::protocol(
                op,
                format!("reply of {} bytes, expected at least {}", buf.len(), min_len),
            )),
            Reply::Data(buf) => Ok(buf),
        }
    }

    /// Success for a status-only reply.
    pub(crate) fn into_status(self, op: &'static str) -> Result<()> {
        match self {
            Reply::Status(STATUS_OK) => Ok(()),
            Reply::Status(code) => Err(MfsError::status(op, code)),
            Reply::Data(buf) => Err(MfsError::protocol(
                op,
                format!("expected a status reply, got {} bytes", buf.len()),
            )),
        }
    }
}
