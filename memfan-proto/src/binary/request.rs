//! Binary protocol request encoding.

use super::header::{Opcode, RequestHeader};

/// Expiration sentinel in incr/decr extras meaning "do not create the key".
pub const EXPIRE_NEVER_CREATE: u32 = 0xFFFF_FFFF;

/// Binary protocol request encoders.
///
/// Every encoder appends one complete packet (header + body) to the buffer
/// and stamps the caller's opaque into the header.
pub struct BinaryRequest;

impl BinaryRequest {
    /// GET. The response carries no key, so the caller must remember which
    /// key this opaque belongs to.
    pub fn get(buf: &mut Vec<u8>, key: &[u8], opaque: u32) {
        Self::key_only(buf, Opcode::Get, key, opaque);
    }

    /// GETK. The response echoes the key.
    pub fn getk(buf: &mut Vec<u8>, key: &[u8], opaque: u32) {
        Self::key_only(buf, Opcode::GetK, key, opaque);
    }

    /// GETKQ. Quiet: misses produce no response at all, so a pipeline of
    /// these must be terminated with a NOOP to find the end.
    pub fn getkq(buf: &mut Vec<u8>, key: &[u8], opaque: u32) {
        Self::key_only(buf, Opcode::GetKQ, key, opaque);
    }

    /// SET/ADD/REPLACE/APPEND/PREPEND. Store opcodes carry
    /// `<flags:u32><exptime:u32>` extras; the concatenation opcodes carry
    /// none.
    pub fn store(
        buf: &mut Vec<u8>,
        opcode: Opcode,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: u32,
        opaque: u32,
    ) {
        let concat = matches!(opcode, Opcode::Append | Opcode::Prepend);
        let extras_len: usize = if concat { 0 } else { 8 };

        let mut header = RequestHeader::new(opcode);
        header.key_length = key.len() as u16;
        header.extras_length = extras_len as u8;
        header.total_body_length = (extras_len + key.len() + value.len()) as u32;
        header.opaque = opaque;
        header.encode(buf);

        if !concat {
            buf.extend_from_slice(&flags.to_be_bytes());
            buf.extend_from_slice(&exptime.to_be_bytes());
        }
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
    }

    /// DELETE.
    pub fn delete(buf: &mut Vec<u8>, key: &[u8], opaque: u32) {
        Self::key_only(buf, Opcode::Delete, key, opaque);
    }

    /// INCREMENT/DECREMENT with `<delta:u64><initial:u64><exptime:u32>`
    /// extras. When `initial` is absent the expiration is the
    /// [`EXPIRE_NEVER_CREATE`] sentinel, so a missing key stays missing.
    pub fn counter(
        buf: &mut Vec<u8>,
        opcode: Opcode,
        key: &[u8],
        delta: u64,
        initial: Option<u64>,
        opaque: u32,
    ) {
        let extras_len = 20;

        let mut header = RequestHeader::new(opcode);
        header.key_length = key.len() as u16;
        header.extras_length = extras_len as u8;
        header.total_body_length = (extras_len as usize + key.len()) as u32;
        header.opaque = opaque;
        header.encode(buf);

        buf.extend_from_slice(&delta.to_be_bytes());
        buf.extend_from_slice(&initial.unwrap_or(0).to_be_bytes());
        let exptime = if initial.is_some() { 0 } else { EXPIRE_NEVER_CREATE };
        buf.extend_from_slice(&exptime.to_be_bytes());
        buf.extend_from_slice(key);
    }

    /// FLUSH, with an optional delay carried as a 4-byte extra.
    pub fn flush(buf: &mut Vec<u8>, delay: Option<u32>, opaque: u32) {
        let mut header = RequestHeader::new(Opcode::Flush);
        header.opaque = opaque;
        if let Some(delay) = delay {
            header.extras_length = 4;
            header.total_body_length = 4;
            header.encode(buf);
            buf.extend_from_slice(&delay.to_be_bytes());
        } else {
            header.encode(buf);
        }
    }

    /// STAT, optionally scoped to a named statistics group.
    pub fn stat(buf: &mut Vec<u8>, arg: Option<&[u8]>, opaque: u32) {
        let key = arg.unwrap_or(b"");
        Self::key_only(buf, Opcode::Stat, key, opaque);
    }

    /// NOOP. Used as the end marker after a quiet-get pipeline.
    pub fn noop(buf: &mut Vec<u8>, opaque: u32) {
        Self::key_only(buf, Opcode::Noop, b"", opaque);
    }

    /// VERSION.
    pub fn version(buf: &mut Vec<u8>, opaque: u32) {
        Self::key_only(buf, Opcode::Version, b"", opaque);
    }

    /// QUIT. Sent as a courtesy before closing the socket.
    pub fn quit(buf: &mut Vec<u8>, opaque: u32) {
        Self::key_only(buf, Opcode::Quit, b"", opaque);
    }

    fn key_only(buf: &mut Vec<u8>, opcode: Opcode, key: &[u8], opaque: u32) {
        let mut header = RequestHeader::new(opcode);
        header.key_length = key.len() as u16;
        header.total_body_length = key.len() as u32;
        header.opaque = opaque;
        header.encode(buf);
        buf.extend_from_slice(key);
    }
}
