//! Engine-level commands and replies.
//!
//! The facade builds a [`Command`] per request and ships it to the owning
//! connection's queue; the protocol driver turns it into wire bytes and the
//! parsed response back into a [`Reply`]. Every command knows its default
//! reply - the result a request completes with when it cannot be dispatched
//! or the server rejects it.

/// The storage verb family. `Append` and `Prepend` concatenate byte-for-byte
/// with the stored value, so their payloads are never serialised or
/// compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

impl StoreVerb {
    /// True for the concatenating verbs.
    #[inline]
    pub fn is_concat(&self) -> bool {
        matches!(self, StoreVerb::Append | StoreVerb::Prepend)
    }
}

/// A queued request, already keyed with the wire (namespaced) key and
/// carrying a transformed payload where applicable.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    Get {
        keys: Vec<Vec<u8>>,
    },
    Store {
        verb: StoreVerb,
        key: Vec<u8>,
        data: Vec<u8>,
        flags: u32,
        exptime: u32,
    },
    Delete {
        key: Vec<u8>,
    },
    Counter {
        incr: bool,
        key: Vec<u8>,
        delta: u64,
        initial: Option<u64>,
    },
    FlushAll {
        delay: Option<u32>,
    },
    Stats {
        arg: Option<String>,
    },
    Version,
}

/// The typed result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// GET hits: `(wire key, flags, data)` per hit.
    Values(Vec<(Vec<u8>, u32, Vec<u8>)>),
    /// Storage verbs.
    Stored(bool),
    /// DELETE.
    Deleted(bool),
    /// INCR/DECR; `None` when the key does not exist.
    Number(Option<u64>),
    /// FLUSH_ALL.
    Ok(bool),
    /// STATS name/value pairs.
    Stats(Vec<(String, String)>),
    /// VERSION string.
    Version(Option<String>),
}

impl Command {
    /// The reply a request completes with when it fails: false for boolean
    /// commands, nothing for value commands, empty for aggregates.
    pub(crate) fn default_reply(&self) -> Reply {
        match self {
            Command::Get { .. } => Reply::Values(Vec::new()),
            Command::Store { .. } => Reply::Stored(false),
            Command::Delete { .. } => Reply::Deleted(false),
            Command::Counter { .. } => Reply::Number(None),
            Command::FlushAll { .. } => Reply::Ok(false),
            Command::Stats { .. } => Reply::Stats(Vec::new()),
            Command::Version => Reply::Version(None),
        }
    }
}
