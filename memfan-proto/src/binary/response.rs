//! Binary protocol response parsing.

use super::header::{HEADER_SIZE, Opcode, ResponseHeader, Status};
use crate::error::ParseError;

/// One parsed response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// GET/GETK/GETKQ hit.
    Value {
        opcode: Opcode,
        opaque: u32,
        cas: u64,
        flags: u32,
        /// Present for the GETK/GETKQ opcodes.
        key: Option<Vec<u8>>,
        value: Vec<u8>,
    },
    /// INCREMENT/DECREMENT result.
    Counter {
        opcode: Opcode,
        opaque: u32,
        cas: u64,
        value: u64,
    },
    /// Any success with no interesting body (SET, DELETE, FLUSH, NOOP, QUIT).
    Success {
        opcode: Opcode,
        opaque: u32,
        cas: u64,
    },
    /// Non-zero status.
    Error {
        opcode: Opcode,
        status: Status,
        opaque: u32,
        message: Vec<u8>,
    },
    /// VERSION string.
    Version { opaque: u32, version: Vec<u8> },
    /// One STAT entry; the terminator has an empty key and value.
    Stat {
        opaque: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
}

impl Packet {
    /// Parse one packet from the start of `data`.
    ///
    /// Returns the packet and the number of bytes consumed, or
    /// [`ParseError::Incomplete`] when the full body has not arrived yet.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let header = ResponseHeader::parse(data)?;

        let total_len = HEADER_SIZE + header.total_body_length as usize;
        if data.len() < total_len {
            return Err(ParseError::Incomplete);
        }

        let extras_len = header.extras_length as usize;
        let key_len = header.key_length as usize;
        if extras_len + key_len > header.total_body_length as usize {
            return Err(ParseError::Protocol("header lengths exceed body length"));
        }

        let body = &data[HEADER_SIZE..total_len];

        if !header.status.is_success() {
            return Ok((
                Packet::Error {
                    opcode: header.opcode,
                    status: header.status,
                    opaque: header.opaque,
                    message: body.to_vec(),
                },
                total_len,
            ));
        }

        let packet = match header.opcode {
            Opcode::Get => {
                let flags = read_flags(body, extras_len);
                Packet::Value {
                    opcode: header.opcode,
                    opaque: header.opaque,
                    cas: header.cas,
                    flags,
                    key: None,
                    value: body[extras_len..].to_vec(),
                }
            }
            Opcode::GetK | Opcode::GetKQ => {
                let flags = read_flags(body, extras_len);
                let key_end = extras_len + key_len;
                Packet::Value {
                    opcode: header.opcode,
                    opaque: header.opaque,
                    cas: header.cas,
                    flags,
                    key: Some(body[extras_len..key_end].to_vec()),
                    value: body[key_end..].to_vec(),
                }
            }
            Opcode::Increment | Opcode::Decrement => {
                if body.len() < 8 {
                    return Err(ParseError::Protocol("counter body too short"));
                }
                Packet::Counter {
                    opcode: header.opcode,
                    opaque: header.opaque,
                    cas: header.cas,
                    value: u64::from_be_bytes([
                        body[0], body[1], body[2], body[3], body[4], body[5], body[6], body[7],
                    ]),
                }
            }
            Opcode::Version => Packet::Version {
                opaque: header.opaque,
                version: body.to_vec(),
            },
            Opcode::Stat => Packet::Stat {
                opaque: header.opaque,
                key: body[..key_len].to_vec(),
                value: body[key_len..].to_vec(),
            },
            _ => Packet::Success {
                opcode: header.opcode,
                opaque: header.opaque,
                cas: header.cas,
            },
        };

        Ok((packet, total_len))
    }

    /// The opaque echoed from the request.
    pub fn opaque(&self) -> u32 {
        match self {
            Packet::Value { opaque, .. }
            | Packet::Counter { opaque, .. }
            | Packet::Success { opaque, .. }
            | Packet::Error { opaque, .. }
            | Packet::Version { opaque, .. }
            | Packet::Stat { opaque, .. } => *opaque,
        }
    }
}

fn read_flags(body: &[u8], extras_len: usize) -> u32 {
    if extras_len >= 4 {
        u32::from_be_bytes([body[0], body[1], body[2], body[3]])
    } else {
        0
    }
}
