//! Frame codec.
//!
//! Values are written big-endian, back to back, with no padding. Strings and
//! byte buffers are written raw; any length prefix is packed explicitly by
//! the caller, because the width of that prefix differs between commands.

use crate::error::{MfsError, Result};

/// A value that can be packed into a frame payload.
pub trait Pack {
    /// Number of bytes [`Pack::pack_into`] appends.
    fn encoded_len(&self) -> usize;

    /// Append the encoded value.
    fn pack_into(&self, buf: &mut Vec<u8>);
}

macro_rules! impl_pack_int {
    ($($t:ty),*) => {
        $(
            impl Pack for $t {
                fn encoded_len(&self) -> usize {
                    std::mem::size_of::<$t>()
                }

                fn pack_into(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_be_bytes());
                }
            }
        )*
    };
}

impl_pack_int!(u8, u16, u32, i32, u64);

impl Pack for str {
    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Pack for String {
    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Pack for [u8] {
    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl Pack for Vec<u8> {
    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl<const N: usize> Pack for [u8; N] {
    fn encoded_len(&self) -> usize {
        N
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn encoded_len(&self) -> usize {
        (**self).encoded_len()
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        (**self).pack_into(buf)
    }
}

/// Pack a sequence of values.
pub fn pack(values: &[&dyn Pack]) -> Vec<u8> {
    let len = values.iter().map(|v| v.encoded_len()).sum();
    let mut buf = Vec::with_capacity(len);
    for v in values {
        v.pack_into(&mut buf);
    }
    buf
}

/// Pack a complete frame: `{cmd, size}` followed by the values.
pub fn pack_command(cmd: u32, values: &[&dyn Pack]) -> Vec<u8> {
    let size: usize = values.iter().map(|v| v.encoded_len()).sum();
    let mut buf = Vec::with_capacity(FrameHeader::LEN + size);
    FrameHeader::new(cmd, size as u32).pack_into(&mut buf);
    for v in values {
        v.pack_into(&mut buf);
    }
    buf
}

/// Prefix an already packed payload with its frame header.
pub fn frame(cmd: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FrameHeader::LEN + payload.len());
    FrameHeader::new(cmd, payload.len() as u32).pack_into(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

/// The 8-byte header in front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub cmd: u32,
    pub size: u32,
}

impl FrameHeader {
    pub const LEN: usize = 8;

    pub fn new(cmd: u32, size: u32) -> Self {
        Self { cmd, size }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&self.cmd.to_be_bytes());
        out[4..].copy_from_slice(&self.size.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8; Self::LEN]) -> Self {
        Self {
            cmd: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            size: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Read the header at the front of an encoded frame.
    pub fn peek(frame: &[u8]) -> Option<Self> {
        let head: &[u8; Self::LEN] = frame.get(..Self::LEN)?.try_into().ok()?;
        Some(Self::decode(head))
    }

    /// Whether this is a keepalive frame that readers must skip.
    pub fn is_nop(&self) -> bool {
        self.cmd == super::ANTOAN_NOP && self.size == 4
    }
}

impl Pack for FrameHeader {
    fn encoded_len(&self) -> usize {
        Self::LEN
    }

    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.encode());
    }
}

/// Cursor over a received payload.
///
/// Reads past the end return a protocol error naming the operation instead
/// of panicking, so a malformed reply can never take the process down.
pub struct Unpacker<'a> {
    op: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(op: &'static str, buf: &'a [u8]) -> Self {
        Self { op, buf, pos: 0 }
    }

    /// Operation named in errors.
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(MfsError::protocol(
                self.op,
                format!(
                    "need {} bytes at offset {}, only {} left",
                    n,
                    self.pos,
                    self.remaining()
                ),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Borrow the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read `n` bytes as a string, replacing invalid UTF-8.
    pub fn string(&mut self, n: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.take(n)?).into_owned())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Everything not yet read.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        out
    }
}
