//! Cache values and the payload tuple that travels through the
//! serializer/compressor pipeline.

/// Flag bit: the payload was produced by the structured serializer.
pub const FLAG_STRUCTURED: u32 = 1;
/// Flag bit: the payload data is gzip-compressed.
pub const FLAG_GZIP: u32 = 2;
/// Flag bit: the payload was produced by the JSON serializer.
pub const FLAG_JSON: u32 = 4;

/// An application-level cache value.
///
/// `Raw` bytes travel verbatim with flags 0. `Structured` documents are
/// encoded by whichever serializer the client is configured with, which
/// marks the payload with its own flag bit so the reader knows how to
/// decode it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Raw(Vec<u8>),
    Structured(serde_json::Value),
}

impl Value {
    /// The raw bytes, if this is a raw value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Raw(data) => Some(data),
            Value::Structured(_) => None,
        }
    }

    /// The raw bytes as UTF-8, if this is a raw value holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Raw(data) => std::str::from_utf8(data).ok(),
            Value::Structured(_) => None,
        }
    }

    /// The document, if this is a structured value.
    pub fn as_document(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Structured(doc) => Some(doc),
            Value::Raw(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Raw(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Raw(s.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(data: &[u8]) -> Self {
        Value::Raw(data.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Value::Raw(data)
    }
}

impl From<serde_json::Value> for Value {
    fn from(doc: serde_json::Value) -> Self {
        Value::Structured(doc)
    }
}

/// The unit exchanged between serializer, compressor and protocol: opaque
/// bytes plus the flag word recording which transformations were applied.
///
/// Transformations are undone in reverse order: decompress, then
/// deserialise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Vec<u8>,
    pub flags: u32,
}

impl Payload {
    /// A payload carrying untransformed bytes.
    pub fn raw(data: Vec<u8>) -> Self {
        Payload { data, flags: 0 }
    }
}
