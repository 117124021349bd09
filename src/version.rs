//! Protocol version values.
//!
//! A version travels on the wire as one `u32` packed as
//! `major:16 | minor:8 | patch:8`. Servers from the 2.x line onwards report
//! the patch field shifted left by one bit, so [`Version::from_wire`] undoes
//! that before the value is compared or displayed.

use crate::error::{MfsError, Result};
use crate::protocol::Pack;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A packed `major.minor.patch` protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u32);

/// Version this client implements.
pub const CLIENT_VERSION: Version = Version::new(3, 0, 103);

/// Oldest master this client will talk to.
pub const MIN_MASTER_VERSION: Version = Version::new(3, 0, 72);

impl Version {
    pub const fn new(major: u16, minor: u8, patch: u8) -> Self {
        Self(((major as u32) << 16) | ((minor as u32) << 8) | patch as u32)
    }

    /// Wrap an already normalised packed value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Decode a version as reported by a master or chunkserver.
    pub fn from_wire(raw: u32) -> Self {
        let v = Self(raw);
        if v.major() >= 2 {
            Self::new(v.major(), v.minor(), v.patch() >> 1)
        } else {
            v
        }
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn major(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn minor(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn patch(&self) -> u8 {
        self.0 as u8
    }

    pub fn at_least(&self, other: Version) -> bool {
        *self >= other
    }

    /// Reject masters older than [`MIN_MASTER_VERSION`].
    pub fn check_master(&self) -> Result<()> {
        if self.at_least(MIN_MASTER_VERSION) {
            Ok(())
        } else {
            Err(MfsError::UnsupportedVersion {
                found: self.to_string(),
                required: MIN_MASTER_VERSION.to_string(),
            })
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

impl FromStr for Version {
    type Err = MfsError;

    /// Parse `major[.minor[.patch]]`; missing parts are zero.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MfsError::InvalidArgument(format!("invalid version: {:?}", s));
        let mut parts = s.trim().split('.');

        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse::<u16>()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(major, minor, patch))
    }
}

impl Pack for Version {
    fn encoded_len(&self) -> usize {
        4
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }
}
