//! Client-side memcached protocol codecs.
//!
//! This crate encodes memcached requests and parses memcached responses
//! without doing any I/O. Both the ASCII text protocol and the 24-byte-header
//! binary protocol are supported; the connection layer decides which one a
//! socket speaks.
//!
//! # Features
//!
//! - `ascii` (default): text protocol support
//! - `binary`: binary protocol support
//! - `full`: both
//!
//! # Text protocol
//!
//! ```
//! use memfan_proto::{Request, Response};
//!
//! // Encode a GET command
//! let mut buf = Vec::new();
//! let keys: &[&[u8]] = &[b"mykey"];
//! Request::get(keys).encode(&mut buf);
//! assert_eq!(buf, b"get mykey\r\n");
//!
//! // Parse the response
//! let reply = b"VALUE mykey 0 5\r\nhello\r\nEND\r\n";
//! let (_response, consumed) = Response::parse(reply).unwrap();
//! assert_eq!(consumed, reply.len());
//! ```
//!
//! Parsers return `(parsed, consumed)` pairs and signal
//! [`ParseError::Incomplete`] when the buffer does not yet hold a full reply,
//! so callers can accumulate bytes and retry.

mod error;
#[cfg(feature = "ascii")]
mod request;
#[cfg(feature = "ascii")]
mod response;

#[cfg(feature = "binary")]
pub mod binary;

pub use error::ParseError;
#[cfg(feature = "ascii")]
pub use request::Request;
#[cfg(feature = "ascii")]
pub use response::{Response, Value};

/// Longest key the protocol accepts, in bytes.
pub const MAX_KEY_LEN: usize = 250;
