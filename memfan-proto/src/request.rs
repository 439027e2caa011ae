//! Request encoding for the memcached text protocol.
//!
//! Commands are ASCII lines terminated by CRLF. Storage commands carry a data
//! block after the command line, also CRLF-terminated.

use std::io::Write;

/// A memcached text-protocol command, borrowed from the caller.
#[derive(Debug, Clone)]
pub enum Request<'a> {
    /// `get <key1> [<key2> ...]\r\n`
    Get { keys: &'a [&'a [u8]] },
    /// `set <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
    Set {
        key: &'a [u8],
        value: &'a [u8],
        flags: u32,
        exptime: u32,
    },
    /// `add <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
    ///
    /// Stores only if the key does not already exist.
    Add {
        key: &'a [u8],
        value: &'a [u8],
        flags: u32,
        exptime: u32,
    },
    /// `replace <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
    ///
    /// Stores only if the key already exists.
    Replace {
        key: &'a [u8],
        value: &'a [u8],
        flags: u32,
        exptime: u32,
    },
    /// `append <key> 0 0 <bytes>\r\n<data>\r\n`
    Append { key: &'a [u8], value: &'a [u8] },
    /// `prepend <key> 0 0 <bytes>\r\n<data>\r\n`
    Prepend { key: &'a [u8], value: &'a [u8] },
    /// `incr <key> <delta>\r\n`
    Incr { key: &'a [u8], delta: u64 },
    /// `decr <key> <delta>\r\n`
    Decr { key: &'a [u8], delta: u64 },
    /// `delete <key>\r\n`
    Delete { key: &'a [u8] },
    /// `flush_all [<delay>]\r\n`
    FlushAll { delay: Option<u32> },
    /// `stats [<arg>]\r\n`
    Stats { arg: Option<&'a [u8]> },
    /// `version\r\n`
    Version,
    /// `quit\r\n`
    Quit,
}

impl<'a> Request<'a> {
    /// Create a GET request for one or more keys.
    #[inline]
    pub fn get(keys: &'a [&'a [u8]]) -> Self {
        Request::Get { keys }
    }

    /// Create an INCR request.
    #[inline]
    pub fn incr(key: &'a [u8], delta: u64) -> Self {
        Request::Incr { key, delta }
    }

    /// Create a DECR request.
    #[inline]
    pub fn decr(key: &'a [u8], delta: u64) -> Self {
        Request::Decr { key, delta }
    }

    /// Create an APPEND request.
    #[inline]
    pub fn append(key: &'a [u8], value: &'a [u8]) -> Self {
        Request::Append { key, value }
    }

    /// Create a PREPEND request.
    #[inline]
    pub fn prepend(key: &'a [u8], value: &'a [u8]) -> Self {
        Request::Prepend { key, value }
    }

    /// Create a DELETE request.
    #[inline]
    pub fn delete(key: &'a [u8]) -> Self {
        Request::Delete { key }
    }

    /// Append the encoded request to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Request::Get { keys } => {
                buf.extend_from_slice(b"get");
                for key in keys.iter() {
                    buf.push(b' ');
                    buf.extend_from_slice(key);
                }
                buf.extend_from_slice(b"\r\n");
            }
            Request::Set {
                key,
                value,
                flags,
                exptime,
            } => encode_storage(buf, b"set", key, value, *flags, *exptime),
            Request::Add {
                key,
                value,
                flags,
                exptime,
            } => encode_storage(buf, b"add", key, value, *flags, *exptime),
            Request::Replace {
                key,
                value,
                flags,
                exptime,
            } => encode_storage(buf, b"replace", key, value, *flags, *exptime),
            Request::Append { key, value } => encode_storage(buf, b"append", key, value, 0, 0),
            Request::Prepend { key, value } => encode_storage(buf, b"prepend", key, value, 0, 0),
            Request::Incr { key, delta } => encode_counter(buf, b"incr", key, *delta),
            Request::Decr { key, delta } => encode_counter(buf, b"decr", key, *delta),
            Request::Delete { key } => {
                buf.extend_from_slice(b"delete ");
                buf.extend_from_slice(key);
                buf.extend_from_slice(b"\r\n");
            }
            Request::FlushAll { delay } => {
                buf.extend_from_slice(b"flush_all");
                if let Some(delay) = delay {
                    write!(buf, " {}", delay).expect("write to Vec");
                }
                buf.extend_from_slice(b"\r\n");
            }
            Request::Stats { arg } => {
                buf.extend_from_slice(b"stats");
                if let Some(arg) = arg {
                    buf.push(b' ');
                    buf.extend_from_slice(arg);
                }
                buf.extend_from_slice(b"\r\n");
            }
            Request::Version => buf.extend_from_slice(b"version\r\n"),
            Request::Quit => buf.extend_from_slice(b"quit\r\n"),
        }
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        self.encode(&mut buf);
        buf
    }
}

/// Encode a storage command: `<cmd> <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
///
/// SET, ADD, REPLACE, APPEND and PREPEND all share this wire shape.
fn encode_storage(
    buf: &mut Vec<u8>,
    cmd: &[u8],
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
) {
    buf.extend_from_slice(cmd);
    buf.push(b' ');
    buf.extend_from_slice(key);
    write!(buf, " {} {} {}\r\n", flags, exptime, value.len()).expect("write to Vec");
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
}

/// Encode `incr`/`decr`: `<cmd> <key> <delta>\r\n`
fn encode_counter(buf: &mut Vec<u8>, cmd: &[u8], key: &[u8], delta: u64) {
    buf.extend_from_slice(cmd);
    buf.push(b' ');
    buf.extend_from_slice(key);
    write!(buf, " {}\r\n", delta).expect("write to Vec");
}
