//! Wire protocol drivers.
//!
//! A driver runs one request/reply exchange over an established socket:
//! encode the command with `memfan-proto`, write it, then read and parse
//! until one full reply has arrived. The queue in front of the connection
//! guarantees a single exchange is in flight at a time, so replies always
//! belong to the request just written.

use std::io;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use memfan_proto::binary::{BinaryRequest, Opcode, Packet, Status};
use memfan_proto::{ParseError, Request, Response};

use crate::command::{Command, Reply, StoreVerb};

/// Which wire protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolKind {
    #[default]
    Text,
    Binary,
}

impl ProtocolKind {
    /// Hook run on the raw socket before the first exchange. The binary
    /// protocol switches the stream into byte mode; the text protocol
    /// leaves the socket as the runtime configured it.
    pub(crate) fn prepare(&self, stream: &TcpStream) -> io::Result<()> {
        match self {
            ProtocolKind::Text => Ok(()),
            ProtocolKind::Binary => stream.set_nodelay(true),
        }
    }
}

/// How an exchange failed.
#[derive(Debug)]
pub(crate) enum DriveError {
    /// Socket-level failure; the connection applies its reconnect policy.
    Io(io::Error),
    /// The reply stream is in an unknown state and the socket must be torn
    /// down. The in-flight request still completes with its default.
    Malformed(&'static str),
}

impl From<io::Error> for DriveError {
    fn from(err: io::Error) -> Self {
        DriveError::Io(err)
    }
}

/// Per-connection protocol driver.
pub(crate) struct Driver {
    kind: ProtocolKind,
    /// Monotonic opaque stamped into binary requests and echoed back.
    opaque: u32,
}

impl Driver {
    pub(crate) fn new(kind: ProtocolKind) -> Self {
        Driver { kind, opaque: 0 }
    }

    /// Run one command to completion on `stream`.
    pub(crate) async fn exchange(
        &mut self,
        stream: &mut TcpStream,
        rbuf: &mut BytesMut,
        cmd: &Command,
    ) -> Result<Reply, DriveError> {
        match self.kind {
            ProtocolKind::Text => self.exchange_text(stream, rbuf, cmd).await,
            ProtocolKind::Binary => self.exchange_binary(stream, rbuf, cmd).await,
        }
    }

    /// Bytes for a courtesy QUIT, written best-effort before an orderly
    /// disconnect.
    pub(crate) fn quit_bytes(&mut self) -> Vec<u8> {
        match self.kind {
            ProtocolKind::Text => Request::Quit.to_vec(),
            ProtocolKind::Binary => {
                let mut buf = Vec::new();
                BinaryRequest::quit(&mut buf, self.next_opaque());
                buf
            }
        }
    }

    fn next_opaque(&mut self) -> u32 {
        self.opaque = self.opaque.wrapping_add(1);
        self.opaque
    }

    // -- Text ----------------------------------------------------------------

    async fn exchange_text(
        &mut self,
        stream: &mut TcpStream,
        rbuf: &mut BytesMut,
        cmd: &Command,
    ) -> Result<Reply, DriveError> {
        let mut wire = Vec::new();
        encode_text(cmd, &mut wire);
        stream.write_all(&wire).await?;

        let response = match read_text_reply(stream, rbuf).await? {
            Some(response) => response,
            // Unparseable but recovered: the request fails, the socket lives.
            None => return Ok(cmd.default_reply()),
        };

        match (cmd, response) {
            (Command::Get { .. }, Response::Values(values)) => Ok(Reply::Values(
                values.into_iter().map(|v| (v.key, v.flags, v.data)).collect(),
            )),
            (Command::Store { .. }, response) => Ok(Reply::Stored(response == Response::Stored)),
            (Command::Delete { .. }, response) => Ok(Reply::Deleted(response == Response::Deleted)),
            (Command::Counter { key, initial, .. }, response) => match response {
                Response::Numeric(value) => Ok(Reply::Number(Some(value))),
                Response::NotFound => match initial {
                    Some(initial) => self.seed_counter(stream, rbuf, key, *initial).await,
                    None => Ok(Reply::Number(None)),
                },
                other => Ok(unexpected(cmd, &other)),
            },
            (Command::FlushAll { .. }, response) => Ok(Reply::Ok(response == Response::Ok)),
            // A server with nothing to report sends a bare END, which the
            // context-free parser reads as an empty VALUE block.
            (Command::Stats { .. }, Response::Values(values)) if values.is_empty() => {
                Ok(Reply::Stats(Vec::new()))
            }
            (Command::Stats { .. }, Response::Stats(pairs)) => Ok(Reply::Stats(
                pairs
                    .into_iter()
                    .map(|(name, value)| {
                        (
                            String::from_utf8_lossy(&name).into_owned(),
                            String::from_utf8_lossy(&value).into_owned(),
                        )
                    })
                    .collect(),
            )),
            (Command::Version, Response::Version(version)) => Ok(Reply::Version(Some(
                String::from_utf8_lossy(&version).into_owned(),
            ))),
            (cmd, other) => Ok(unexpected(cmd, &other)),
        }
    }

    /// The NOT_FOUND leg of incr/decr with an initial value: try to create
    /// the counter with a bare `add`. The operation succeeds with the
    /// initial iff the add stores.
    async fn seed_counter(
        &mut self,
        stream: &mut TcpStream,
        rbuf: &mut BytesMut,
        key: &[u8],
        initial: u64,
    ) -> Result<Reply, DriveError> {
        let value = initial.to_string();
        let add = Request::Add {
            key,
            value: value.as_bytes(),
            flags: 0,
            exptime: 0,
        };
        stream.write_all(&add.to_vec()).await?;

        match read_text_reply(stream, rbuf).await? {
            Some(Response::Stored) => Ok(Reply::Number(Some(initial))),
            Some(_) | None => Ok(Reply::Number(None)),
        }
    }

    // -- Binary --------------------------------------------------------------

    async fn exchange_binary(
        &mut self,
        stream: &mut TcpStream,
        rbuf: &mut BytesMut,
        cmd: &Command,
    ) -> Result<Reply, DriveError> {
        match cmd {
            Command::Get { keys } if keys.len() == 1 => {
                let opaque = self.next_opaque();
                let mut wire = Vec::new();
                BinaryRequest::get(&mut wire, &keys[0], opaque);
                stream.write_all(&wire).await?;

                match read_packet(stream, rbuf).await? {
                    Packet::Value { flags, value, cas, .. } => {
                        check_cas_width(cas);
                        Ok(Reply::Values(vec![(keys[0].clone(), flags, value)]))
                    }
                    Packet::Error {
                        status: Status::KeyNotFound,
                        ..
                    } => Ok(Reply::Values(Vec::new())),
                    other => Ok(unexpected_packet(cmd, &other)),
                }
            }
            Command::Get { keys } => self.pipelined_get(stream, rbuf, keys).await,
            Command::Store {
                verb,
                key,
                data,
                flags,
                exptime,
            } => {
                let opaque = self.next_opaque();
                let mut wire = Vec::new();
                BinaryRequest::store(&mut wire, store_opcode(*verb), key, data, *flags, *exptime, opaque);
                stream.write_all(&wire).await?;

                match read_packet(stream, rbuf).await? {
                    Packet::Success { cas, .. } => {
                        check_cas_width(cas);
                        Ok(Reply::Stored(true))
                    }
                    Packet::Error { .. } => Ok(Reply::Stored(false)),
                    other => Ok(unexpected_packet(cmd, &other)),
                }
            }
            Command::Delete { key } => {
                let opaque = self.next_opaque();
                let mut wire = Vec::new();
                BinaryRequest::delete(&mut wire, key, opaque);
                stream.write_all(&wire).await?;

                match read_packet(stream, rbuf).await? {
                    Packet::Success { .. } => Ok(Reply::Deleted(true)),
                    Packet::Error { .. } => Ok(Reply::Deleted(false)),
                    other => Ok(unexpected_packet(cmd, &other)),
                }
            }
            Command::Counter {
                incr,
                key,
                delta,
                initial,
            } => {
                let opcode = if *incr { Opcode::Increment } else { Opcode::Decrement };
                let opaque = self.next_opaque();
                let mut wire = Vec::new();
                BinaryRequest::counter(&mut wire, opcode, key, *delta, *initial, opaque);
                stream.write_all(&wire).await?;

                match read_packet(stream, rbuf).await? {
                    Packet::Counter { value, cas, .. } => {
                        check_cas_width(cas);
                        Ok(Reply::Number(Some(value)))
                    }
                    Packet::Error { .. } => Ok(Reply::Number(None)),
                    other => Ok(unexpected_packet(cmd, &other)),
                }
            }
            Command::FlushAll { delay } => {
                let opaque = self.next_opaque();
                let mut wire = Vec::new();
                BinaryRequest::flush(&mut wire, *delay, opaque);
                stream.write_all(&wire).await?;

                match read_packet(stream, rbuf).await? {
                    Packet::Success { .. } => Ok(Reply::Ok(true)),
                    Packet::Error { .. } => Ok(Reply::Ok(false)),
                    other => Ok(unexpected_packet(cmd, &other)),
                }
            }
            Command::Stats { arg } => {
                let opaque = self.next_opaque();
                let mut wire = Vec::new();
                BinaryRequest::stat(&mut wire, arg.as_deref().map(str::as_bytes), opaque);
                stream.write_all(&wire).await?;

                let mut stats = Vec::new();
                loop {
                    match read_packet(stream, rbuf).await? {
                        Packet::Stat { key, value, .. } => {
                            // The empty-key entry terminates the stream.
                            if key.is_empty() {
                                return Ok(Reply::Stats(stats));
                            }
                            stats.push((
                                String::from_utf8_lossy(&key).into_owned(),
                                String::from_utf8_lossy(&value).into_owned(),
                            ));
                        }
                        Packet::Error { .. } => return Ok(Reply::Stats(Vec::new())),
                        other => return Ok(unexpected_packet(cmd, &other)),
                    }
                }
            }
            Command::Version => {
                let opaque = self.next_opaque();
                let mut wire = Vec::new();
                BinaryRequest::version(&mut wire, opaque);
                stream.write_all(&wire).await?;

                match read_packet(stream, rbuf).await? {
                    Packet::Version { version, .. } => Ok(Reply::Version(Some(
                        String::from_utf8_lossy(&version).into_owned(),
                    ))),
                    Packet::Error { .. } => Ok(Reply::Version(None)),
                    other => Ok(unexpected_packet(cmd, &other)),
                }
            }
        }
    }

    /// Multi-key binary get: one quiet GETKQ per key, closed by a NOOP.
    /// Misses produce no packet at all, so everything before the NOOP echo
    /// is a hit.
    async fn pipelined_get(
        &mut self,
        stream: &mut TcpStream,
        rbuf: &mut BytesMut,
        keys: &[Vec<u8>],
    ) -> Result<Reply, DriveError> {
        let mut wire = Vec::new();
        for key in keys {
            let opaque = self.next_opaque();
            BinaryRequest::getkq(&mut wire, key, opaque);
        }
        let end_opaque = self.next_opaque();
        BinaryRequest::noop(&mut wire, end_opaque);
        stream.write_all(&wire).await?;

        let mut hits = Vec::new();
        loop {
            match read_packet(stream, rbuf).await? {
                Packet::Value {
                    key: Some(key),
                    flags,
                    value,
                    cas,
                    ..
                } => {
                    check_cas_width(cas);
                    hits.push((key, flags, value));
                }
                Packet::Success {
                    opcode: Opcode::Noop,
                    opaque,
                    ..
                } if opaque == end_opaque => return Ok(Reply::Values(hits)),
                Packet::Error { status, .. } => {
                    log::warn!("pipelined get leg rejected: {status:?}");
                }
                other => {
                    log::warn!("unexpected packet in pipelined get: {other:?}");
                }
            }
        }
    }
}

fn store_opcode(verb: StoreVerb) -> Opcode {
    match verb {
        StoreVerb::Set => Opcode::Set,
        StoreVerb::Add => Opcode::Add,
        StoreVerb::Replace => Opcode::Replace,
        StoreVerb::Append => Opcode::Append,
        StoreVerb::Prepend => Opcode::Prepend,
    }
}

fn encode_text(cmd: &Command, buf: &mut Vec<u8>) {
    match cmd {
        Command::Get { keys } => {
            let keys: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
            Request::Get { keys: &keys }.encode(buf);
        }
        Command::Store {
            verb,
            key,
            data,
            flags,
            exptime,
        } => {
            let (key, value) = (key.as_slice(), data.as_slice());
            let request = match verb {
                StoreVerb::Set => Request::Set {
                    key,
                    value,
                    flags: *flags,
                    exptime: *exptime,
                },
                StoreVerb::Add => Request::Add {
                    key,
                    value,
                    flags: *flags,
                    exptime: *exptime,
                },
                StoreVerb::Replace => Request::Replace {
                    key,
                    value,
                    flags: *flags,
                    exptime: *exptime,
                },
                StoreVerb::Append => Request::Append { key, value },
                StoreVerb::Prepend => Request::Prepend { key, value },
            };
            request.encode(buf);
        }
        Command::Delete { key } => Request::delete(key).encode(buf),
        Command::Counter {
            incr, key, delta, ..
        } => {
            let request = if *incr {
                Request::incr(key, *delta)
            } else {
                Request::decr(key, *delta)
            };
            request.encode(buf);
        }
        Command::FlushAll { delay } => Request::FlushAll { delay: *delay }.encode(buf),
        Command::Stats { arg } => Request::Stats {
            arg: arg.as_deref().map(str::as_bytes),
        }
        .encode(buf),
        Command::Version => Request::Version.encode(buf),
    }
}

/// Read until one full text reply has parsed.
///
/// `Ok(None)` means the server sent a line this client cannot interpret; the
/// line has been discarded and the in-flight request should complete with
/// its default.
async fn read_text_reply(
    stream: &mut TcpStream,
    rbuf: &mut BytesMut,
) -> Result<Option<Response>, DriveError> {
    loop {
        if !rbuf.is_empty() {
            match Response::parse(rbuf) {
                Ok((response, consumed)) => {
                    rbuf.advance(consumed);
                    return Ok(Some(response));
                }
                Err(ParseError::Incomplete) => {}
                Err(err) => {
                    // Skip the offending line and keep the connection; the
                    // stream is line-oriented so the next reply starts clean.
                    match find_crlf(rbuf) {
                        Some(pos) => {
                            log::warn!("discarding malformed reply line: {err}");
                            rbuf.advance(pos + 2);
                            return Ok(None);
                        }
                        None => return Err(DriveError::Malformed("unterminated reply line")),
                    }
                }
            }
        }
        if stream.read_buf(rbuf).await? == 0 {
            return Err(DriveError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection mid-reply",
            )));
        }
    }
}

/// Read until one full binary packet has parsed. Any framing error is
/// unrecoverable because packet boundaries are lost.
async fn read_packet(stream: &mut TcpStream, rbuf: &mut BytesMut) -> Result<Packet, DriveError> {
    loop {
        if !rbuf.is_empty() {
            match Packet::parse(rbuf) {
                Ok((packet, consumed)) => {
                    rbuf.advance(consumed);
                    return Ok(packet);
                }
                Err(ParseError::Incomplete) => {}
                Err(_) => return Err(DriveError::Malformed("unparseable binary packet")),
            }
        }
        if stream.read_buf(rbuf).await? == 0 {
            return Err(DriveError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection mid-packet",
            )));
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn unexpected(cmd: &Command, response: &Response) -> Reply {
    log::warn!("reply does not match command, using default: {response:?}");
    cmd.default_reply()
}

fn unexpected_packet(cmd: &Command, packet: &Packet) -> Reply {
    log::warn!("packet does not match command, using default: {packet:?}");
    cmd.default_reply()
}

/// High CAS words cannot survive a 32-bit word size; warn so the caller
/// knows CAS-dependent operations may misbehave.
#[cfg(target_pointer_width = "32")]
fn check_cas_width(cas: u64) {
    if cas >> 32 != 0 {
        log::warn!("server returned a CAS with a non-zero high word on a 32-bit target");
    }
}

#[cfg(not(target_pointer_width = "32"))]
fn check_cas_width(_cas: u64) {}
