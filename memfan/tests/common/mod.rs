//! In-process mock memcached servers for integration tests.
//!
//! The text mock implements enough of the protocol to exercise every client
//! command against an in-memory store; the binary mock covers the packet
//! shapes the binary driver emits. Both record the commands they receive so
//! tests can assert on dispatch order.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use memfan_proto::binary::{HEADER_SIZE, Opcode, RequestHeader, ResponseHeader, Status};

pub type Store = Arc<Mutex<HashMap<String, (u32, Vec<u8>)>>>;
pub type CommandLog = Arc<Mutex<Vec<String>>>;

pub struct MockServer {
    pub addr: SocketAddr,
    pub store: Store,
    pub log: CommandLog,
}

impl MockServer {
    pub fn server_id(&self) -> String {
        self.addr.to_string()
    }

    pub fn logged(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn stored(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().unwrap().get(key).map(|(_, data)| data.clone())
    }
}

/// Spawn a text-protocol mock.
pub async fn spawn_text() -> MockServer {
    spawn_text_dropping(0).await
}

/// Spawn a text-protocol mock that closes the first `drop_first` accepted
/// connections immediately, before reading anything.
pub async fn spawn_text_dropping(drop_first: usize) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    let store: Store = Arc::new(Mutex::new(HashMap::new()));
    let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
    let accepted = Arc::new(AtomicUsize::new(0));

    {
        let store = store.clone();
        let log = log.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                if accepted.fetch_add(1, Ordering::SeqCst) < drop_first {
                    drop(stream);
                    continue;
                }
                let (reader, writer) = stream.into_split();
                tokio::spawn(serve_text(reader, writer, store.clone(), log.clone()));
            }
        });
    }

    MockServer { addr, store, log }
}

async fn serve_text(reader: OwnedReadHalf, mut writer: OwnedWriteHalf, store: Store, log: CommandLog) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let parts: Vec<String> = line.trim_end().split(' ').map(str::to_owned).collect();
        if parts.is_empty() || parts[0].is_empty() {
            continue;
        }
        let cmd = parts[0].as_str();

        let reply: Vec<u8> = match cmd {
            "set" | "add" | "replace" | "append" | "prepend" => {
                let key = parts[1].clone();
                let flags: u32 = parts[2].parse().unwrap_or(0);
                let len: usize = parts[4].parse().unwrap_or(0);
                let mut data = vec![0u8; len + 2];
                if reader.read_exact(&mut data).await.is_err() {
                    return;
                }
                data.truncate(len);
                log.lock().unwrap().push(format!("{cmd} {key}"));

                let mut store = store.lock().unwrap();
                let stored = match cmd {
                    "set" => {
                        store.insert(key, (flags, data));
                        true
                    }
                    "add" => {
                        if store.contains_key(&key) {
                            false
                        } else {
                            store.insert(key, (flags, data));
                            true
                        }
                    }
                    "replace" => {
                        if store.contains_key(&key) {
                            store.insert(key, (flags, data));
                            true
                        } else {
                            false
                        }
                    }
                    "append" => match store.get_mut(&key) {
                        Some((_, existing)) => {
                            existing.extend_from_slice(&data);
                            true
                        }
                        None => false,
                    },
                    "prepend" => match store.get_mut(&key) {
                        Some((_, existing)) => {
                            let mut joined = data;
                            joined.extend_from_slice(existing);
                            *existing = joined;
                            true
                        }
                        None => false,
                    },
                    _ => unreachable!(),
                };
                if stored {
                    b"STORED\r\n".to_vec()
                } else {
                    b"NOT_STORED\r\n".to_vec()
                }
            }
            "get" => {
                log.lock().unwrap().push(line.trim_end().to_owned());
                let store = store.lock().unwrap();
                let mut out = Vec::new();
                for key in &parts[1..] {
                    if let Some((flags, data)) = store.get(key.as_str()) {
                        out.extend_from_slice(
                            format!("VALUE {key} {flags} {}\r\n", data.len()).as_bytes(),
                        );
                        out.extend_from_slice(data);
                        out.extend_from_slice(b"\r\n");
                    }
                }
                out.extend_from_slice(b"END\r\n");
                out
            }
            "delete" => {
                let key = &parts[1];
                log.lock().unwrap().push(format!("delete {key}"));
                if store.lock().unwrap().remove(key.as_str()).is_some() {
                    b"DELETED\r\n".to_vec()
                } else {
                    b"NOT_FOUND\r\n".to_vec()
                }
            }
            "incr" | "decr" => {
                let key = parts[1].clone();
                let delta: u64 = parts[2].parse().unwrap_or(0);
                log.lock().unwrap().push(format!("{cmd} {key}"));
                let mut store = store.lock().unwrap();
                match store.get_mut(&key) {
                    None => b"NOT_FOUND\r\n".to_vec(),
                    Some((_, data)) => {
                        match std::str::from_utf8(data).ok().and_then(|s| s.parse::<u64>().ok()) {
                            None => {
                                b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n"
                                    .to_vec()
                            }
                            Some(current) => {
                                let next = if cmd == "incr" {
                                    current.wrapping_add(delta)
                                } else {
                                    current.saturating_sub(delta)
                                };
                                *data = next.to_string().into_bytes();
                                format!("{next}\r\n").into_bytes()
                            }
                        }
                    }
                }
            }
            "flush_all" => {
                log.lock().unwrap().push(line.trim_end().to_owned());
                store.lock().unwrap().clear();
                b"OK\r\n".to_vec()
            }
            "stats" => {
                log.lock().unwrap().push(line.trim_end().to_owned());
                let items = store.lock().unwrap().len();
                let mut out = Vec::new();
                out.extend_from_slice(b"STAT pid 1234\r\n");
                out.extend_from_slice(format!("STAT curr_items {items}\r\n").as_bytes());
                out.extend_from_slice(b"END\r\n");
                out
            }
            "version" => b"VERSION 1.6.0-mock\r\n".to_vec(),
            "quit" => return,
            _ => b"ERROR\r\n".to_vec(),
        };

        if writer.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Spawn a binary-protocol mock.
pub async fn spawn_binary() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    let store: Store = Arc::new(Mutex::new(HashMap::new()));
    let log: CommandLog = Arc::new(Mutex::new(Vec::new()));

    {
        let store = store.clone();
        let log = log.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let (reader, writer) = stream.into_split();
                tokio::spawn(serve_binary(reader, writer, store.clone(), log.clone()));
            }
        });
    }

    MockServer { addr, store, log }
}

async fn serve_binary(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    store: Store,
    log: CommandLog,
) {
    loop {
        let mut head = [0u8; HEADER_SIZE];
        if reader.read_exact(&mut head).await.is_err() {
            return;
        }
        let Ok(header) = RequestHeader::parse(&head) else {
            return;
        };
        let mut body = vec![0u8; header.total_body_length as usize];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        let extras_len = header.extras_length as usize;
        let key_end = extras_len + header.key_length as usize;
        let extras = &body[..extras_len];
        let key = String::from_utf8_lossy(&body[extras_len..key_end]).into_owned();
        let value = body[key_end..].to_vec();
        log.lock().unwrap().push(format!("{:?} {key}", header.opcode));

        let mut out = Vec::new();
        match header.opcode {
            Opcode::Get | Opcode::GetK | Opcode::GetKQ => {
                let hit = store.lock().unwrap().get(&key).cloned();
                match hit {
                    Some((flags, data)) => {
                        let echo_key = matches!(header.opcode, Opcode::GetK | Opcode::GetKQ);
                        let key_bytes: &[u8] = if echo_key { key.as_bytes() } else { &[] };
                        let mut resp = ResponseHeader::new(header.opcode, Status::NoError);
                        resp.extras_length = 4;
                        resp.key_length = key_bytes.len() as u16;
                        resp.total_body_length = (4 + key_bytes.len() + data.len()) as u32;
                        resp.opaque = header.opaque;
                        resp.cas = 1;
                        resp.encode(&mut out);
                        out.extend_from_slice(&flags.to_be_bytes());
                        out.extend_from_slice(key_bytes);
                        out.extend_from_slice(&data);
                    }
                    None => {
                        // Quiet get: a miss sends nothing at all.
                        if header.opcode != Opcode::GetKQ {
                            encode_error(&mut out, header.opcode, header.opaque, Status::KeyNotFound);
                        }
                    }
                }
            }
            Opcode::Set | Opcode::Add | Opcode::Replace => {
                let flags = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);
                let mut store = store.lock().unwrap();
                let exists = store.contains_key(&key);
                let ok = match header.opcode {
                    Opcode::Add if exists => false,
                    Opcode::Replace if !exists => false,
                    _ => {
                        store.insert(key, (flags, value));
                        true
                    }
                };
                if ok {
                    encode_success(&mut out, header.opcode, header.opaque);
                } else {
                    let status = if exists {
                        Status::KeyExists
                    } else {
                        Status::KeyNotFound
                    };
                    encode_error(&mut out, header.opcode, header.opaque, status);
                }
            }
            Opcode::Append | Opcode::Prepend => {
                let mut store = store.lock().unwrap();
                match store.get_mut(&key) {
                    Some((_, existing)) => {
                        if header.opcode == Opcode::Append {
                            existing.extend_from_slice(&value);
                        } else {
                            let mut joined = value;
                            joined.extend_from_slice(existing);
                            *existing = joined;
                        }
                        encode_success(&mut out, header.opcode, header.opaque);
                    }
                    None => encode_error(&mut out, header.opcode, header.opaque, Status::ItemNotStored),
                }
            }
            Opcode::Delete => {
                if store.lock().unwrap().remove(&key).is_some() {
                    encode_success(&mut out, header.opcode, header.opaque);
                } else {
                    encode_error(&mut out, header.opcode, header.opaque, Status::KeyNotFound);
                }
            }
            Opcode::Increment | Opcode::Decrement => {
                let delta = u64::from_be_bytes(extras[..8].try_into().unwrap());
                let initial = u64::from_be_bytes(extras[8..16].try_into().unwrap());
                let exptime = u32::from_be_bytes(extras[16..20].try_into().unwrap());
                let mut store = store.lock().unwrap();
                let current = store.get(&key).and_then(|(_, data)| {
                    std::str::from_utf8(data).ok().and_then(|s| s.parse::<u64>().ok())
                });
                match current {
                    Some(current) => {
                        let next = if header.opcode == Opcode::Increment {
                            current.wrapping_add(delta)
                        } else {
                            current.saturating_sub(delta)
                        };
                        store.insert(key, (0, next.to_string().into_bytes()));
                        encode_counter(&mut out, header.opcode, header.opaque, next);
                    }
                    None if exptime == u32::MAX => {
                        encode_error(&mut out, header.opcode, header.opaque, Status::KeyNotFound);
                    }
                    None => {
                        store.insert(key, (0, initial.to_string().into_bytes()));
                        encode_counter(&mut out, header.opcode, header.opaque, initial);
                    }
                }
            }
            Opcode::Flush => {
                store.lock().unwrap().clear();
                encode_success(&mut out, header.opcode, header.opaque);
            }
            Opcode::Noop => encode_success(&mut out, header.opcode, header.opaque),
            Opcode::Version => {
                let version = b"1.6.0-mock";
                let mut resp = ResponseHeader::new(Opcode::Version, Status::NoError);
                resp.total_body_length = version.len() as u32;
                resp.opaque = header.opaque;
                resp.encode(&mut out);
                out.extend_from_slice(version);
            }
            Opcode::Stat => {
                let items = store.lock().unwrap().len().to_string();
                for (name, value) in [("pid", "1234"), ("curr_items", items.as_str())] {
                    let mut resp = ResponseHeader::new(Opcode::Stat, Status::NoError);
                    resp.key_length = name.len() as u16;
                    resp.total_body_length = (name.len() + value.len()) as u32;
                    resp.opaque = header.opaque;
                    resp.encode(&mut out);
                    out.extend_from_slice(name.as_bytes());
                    out.extend_from_slice(value.as_bytes());
                }
                // Empty-key terminator.
                let mut resp = ResponseHeader::new(Opcode::Stat, Status::NoError);
                resp.opaque = header.opaque;
                resp.encode(&mut out);
            }
            Opcode::Quit => return,
        }

        if !out.is_empty() && writer.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn encode_success(out: &mut Vec<u8>, opcode: Opcode, opaque: u32) {
    let mut resp = ResponseHeader::new(opcode, Status::NoError);
    resp.opaque = opaque;
    resp.cas = 1;
    resp.encode(out);
}

fn encode_error(out: &mut Vec<u8>, opcode: Opcode, opaque: u32, status: Status) {
    let message = b"error";
    let mut resp = ResponseHeader::new(opcode, status);
    resp.total_body_length = message.len() as u32;
    resp.opaque = opaque;
    resp.encode(out);
    out.extend_from_slice(message);
}

fn encode_counter(out: &mut Vec<u8>, opcode: Opcode, opaque: u32, value: u64) {
    let mut resp = ResponseHeader::new(opcode, Status::NoError);
    resp.total_body_length = 8;
    resp.opaque = opaque;
    resp.cas = 1;
    resp.encode(out);
    out.extend_from_slice(&value.to_be_bytes());
}

/// Grab a port that nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}
