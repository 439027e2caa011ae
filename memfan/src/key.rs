//! Cache keys: plain strings and pre-hashed (bucket, key) pairs.

pub use memfan_proto::MAX_KEY_LEN;

/// A cache key.
///
/// `Plain` keys are hashed by the selector to pick a server. `Hashed` keys
/// carry a bucket index that addresses the ring directly; the inner string
/// is still what travels on the wire and must pass the same validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Plain(String),
    Hashed { index: u64, key: String },
}

impl Key {
    /// The real key - the string that goes on the wire (before the
    /// namespace prefix is applied).
    pub fn real(&self) -> &str {
        match self {
            Key::Plain(key) => key,
            Key::Hashed { key, .. } => key,
        }
    }

    /// The pre-computed bucket index, if any.
    pub fn index(&self) -> Option<u64> {
        match self {
            Key::Plain(_) => None,
            Key::Hashed { index, .. } => Some(*index),
        }
    }

    /// Replace the real key, keeping the routing form.
    pub(crate) fn with_real(&self, real: String) -> Key {
        match self {
            Key::Plain(_) => Key::Plain(real),
            Key::Hashed { index, .. } => Key::Hashed {
                index: *index,
                key: real,
            },
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Plain(key.to_owned())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Plain(key)
    }
}

impl From<&String> for Key {
    fn from(key: &String) -> Self {
        Key::Plain(key.clone())
    }
}

impl From<(u64, &str)> for Key {
    fn from((index, key): (u64, &str)) -> Self {
        Key::Hashed {
            index,
            key: key.to_owned(),
        }
    }
}

impl From<(u64, String)> for Key {
    fn from((index, key): (u64, String)) -> Self {
        Key::Hashed { index, key }
    }
}

/// Check the wire rules: 1-250 bytes, no ASCII space.
pub(crate) fn valid(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LEN && !key.bytes().any(|b| b == b' ')
}
