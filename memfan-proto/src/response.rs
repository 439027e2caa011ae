//! Response parsing for the memcached text protocol.
//!
//! Reply shapes:
//! - `VALUE <key> <flags> <bytes> [<cas>]\r\n<data>\r\n ... END\r\n` - GET
//! - `STAT <name> <value>\r\n ... END\r\n` - STATS
//! - `STORED\r\n` / `NOT_STORED\r\n` - storage commands
//! - `DELETED\r\n` / `NOT_FOUND\r\n` - DELETE
//! - `<number>\r\n` - INCR/DECR
//! - `VERSION <string>\r\n` - VERSION
//! - `OK\r\n` - FLUSH_ALL
//! - `ERROR\r\n` / `CLIENT_ERROR <msg>\r\n` / `SERVER_ERROR <msg>\r\n`

use crate::error::ParseError;

/// A single value block from a GET reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub key: Vec<u8>,
    pub flags: u32,
    pub data: Vec<u8>,
    /// CAS token, present when the server includes the optional fifth field.
    pub cas: Option<u64>,
}

/// A parsed memcached text reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Zero or more VALUE blocks terminated by END.
    Values(Vec<Value>),
    /// Zero or more STAT lines terminated by END.
    Stats(Vec<(Vec<u8>, Vec<u8>)>),
    /// STORED
    Stored,
    /// NOT_STORED
    NotStored,
    /// DELETED
    Deleted,
    /// NOT_FOUND
    NotFound,
    /// OK
    Ok,
    /// New counter value from INCR/DECR.
    Numeric(u64),
    /// VERSION string.
    Version(Vec<u8>),
    /// ERROR
    Error,
    /// CLIENT_ERROR with message.
    ClientError(Vec<u8>),
    /// SERVER_ERROR with message.
    ServerError(Vec<u8>),
}

impl Response {
    /// Returns true if this is an error reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Response::Error | Response::ClientError(_) | Response::ServerError(_)
        )
    }

    /// Parse one reply from the start of `data`.
    ///
    /// Returns the reply and the number of bytes consumed, or
    /// [`ParseError::Incomplete`] if the buffer does not yet hold a full
    /// reply.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let line_end = find_crlf(data).ok_or(ParseError::Incomplete)?;
        let line = &data[..line_end];

        if line == b"STORED" {
            return Ok((Response::Stored, line_end + 2));
        }
        if line == b"NOT_STORED" {
            return Ok((Response::NotStored, line_end + 2));
        }
        if line == b"DELETED" {
            return Ok((Response::Deleted, line_end + 2));
        }
        if line == b"NOT_FOUND" {
            return Ok((Response::NotFound, line_end + 2));
        }
        if line == b"OK" {
            return Ok((Response::Ok, line_end + 2));
        }
        if line == b"END" {
            // A GET that matched nothing.
            return Ok((Response::Values(vec![]), line_end + 2));
        }
        if line == b"ERROR" {
            return Ok((Response::Error, line_end + 2));
        }
        if let Some(msg) = line.strip_prefix(b"CLIENT_ERROR ") {
            return Ok((Response::ClientError(msg.to_vec()), line_end + 2));
        }
        if let Some(msg) = line.strip_prefix(b"SERVER_ERROR ") {
            return Ok((Response::ServerError(msg.to_vec()), line_end + 2));
        }
        if let Some(version) = line.strip_prefix(b"VERSION ") {
            return Ok((Response::Version(version.to_vec()), line_end + 2));
        }
        if line.starts_with(b"VALUE ") {
            return parse_values(data);
        }
        if line.starts_with(b"STAT ") {
            return parse_stats(data);
        }
        if !line.is_empty() && line.iter().all(|b| b.is_ascii_digit()) {
            let value = parse_u64(line)?;
            return Ok((Response::Numeric(value), line_end + 2));
        }

        Err(ParseError::Protocol("unknown reply"))
    }
}

/// Find `\r\n` in `data`, returning the position of the `\r`.
fn find_crlf(data: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = memchr::memchr(b'\r', &data[from..]) {
        let at = from + pos;
        if at + 1 < data.len() {
            if data[at + 1] == b'\n' {
                return Some(at);
            }
            from = at + 1;
        } else {
            return None;
        }
    }
    None
}

/// Parse VALUE blocks until END.
fn parse_values(data: &[u8]) -> Result<(Response, usize), ParseError> {
    let mut values = Vec::new();
    let mut pos = 0;

    loop {
        let remaining = &data[pos..];
        let line_end = find_crlf(remaining).ok_or(ParseError::Incomplete)?;
        let line = &remaining[..line_end];

        if line == b"END" {
            pos += line_end + 2;
            break;
        }

        // VALUE <key> <flags> <bytes> [<cas>]
        let fields = line
            .strip_prefix(b"VALUE ")
            .ok_or(ParseError::Protocol("expected VALUE or END"))?;
        let parts: Vec<&[u8]> = fields.split(|&b| b == b' ').collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(ParseError::Protocol("invalid VALUE line"));
        }

        let key = parts[0].to_vec();
        let flags = parse_u32(parts[1])?;
        let size = parse_u64(parts[2])? as usize;
        let cas = match parts.get(3) {
            Some(raw) => Some(parse_u64(raw)?),
            None => None,
        };

        // <data>\r\n
        let data_start = pos + line_end + 2;
        let data_end = data_start + size;
        if data.len() < data_end + 2 {
            return Err(ParseError::Incomplete);
        }
        if &data[data_end..data_end + 2] != b"\r\n" {
            return Err(ParseError::Protocol("value data not CRLF-terminated"));
        }

        values.push(Value {
            key,
            flags,
            data: data[data_start..data_end].to_vec(),
            cas,
        });
        pos = data_end + 2;
    }

    Ok((Response::Values(values), pos))
}

/// Parse STAT lines until END.
fn parse_stats(data: &[u8]) -> Result<(Response, usize), ParseError> {
    let mut stats = Vec::new();
    let mut pos = 0;

    loop {
        let remaining = &data[pos..];
        let line_end = find_crlf(remaining).ok_or(ParseError::Incomplete)?;
        let line = &remaining[..line_end];
        pos += line_end + 2;

        if line == b"END" {
            break;
        }

        // STAT <name> <value>
        let fields = line
            .strip_prefix(b"STAT ")
            .ok_or(ParseError::Protocol("expected STAT or END"))?;
        match memchr::memchr(b' ', fields) {
            Some(sep) => stats.push((fields[..sep].to_vec(), fields[sep + 1..].to_vec())),
            // Some stats have no value field.
            None => stats.push((fields.to_vec(), Vec::new())),
        }
    }

    Ok((Response::Stats(stats), pos))
}

fn parse_u32(data: &[u8]) -> Result<u32, ParseError> {
    parse_u64(data).and_then(|v| u32::try_from(v).map_err(|_| ParseError::InvalidNumber))
}

fn parse_u64(data: &[u8]) -> Result<u64, ParseError> {
    if data.is_empty() {
        return Err(ParseError::InvalidNumber);
    }
    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(ParseError::InvalidNumber);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or(ParseError::InvalidNumber)?;
    }
    Ok(value)
}
