//! Client configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::protocol::ProtocolKind;

/// Default memcached port, appended when a server address omits one.
pub const DEFAULT_PORT: u16 = 11211;

/// One configured server: a `host:port` identity plus a routing weight.
///
/// A weight of `w` gives the server `w` buckets on the selection ring, so a
/// weight-2 server receives roughly twice the keys of a weight-1 server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub id: String,
    pub weight: u32,
}

impl ServerSpec {
    /// A server with an explicit weight.
    pub fn weighted(addr: &str, weight: u32) -> Result<Self, Error> {
        if weight == 0 {
            return Err(Error::ZeroWeight(addr.to_owned()));
        }
        let mut spec: ServerSpec = addr.parse()?;
        spec.weight = weight;
        Ok(spec)
    }
}

impl FromStr for ServerSpec {
    type Err = Error;

    /// Parse `host[:port]`, defaulting the port to 11211.
    fn from_str(addr: &str) -> Result<Self, Error> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(Error::InvalidServer(addr.to_owned()));
        }
        let id = match addr.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(Error::InvalidServer(addr.to_owned()));
                }
                addr.to_owned()
            }
            None => format!("{addr}:{DEFAULT_PORT}"),
        };
        Ok(ServerSpec { id, weight: 1 })
    }
}

/// Which serializer encodes structured values.
///
/// The two formats mark payloads with different flag bits and are not
/// interoperable: a value written by one cannot be read by the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerKind {
    /// MessagePack, flag bit 1.
    #[default]
    Structured,
    /// JSON, flag bit 4.
    Json,
}

/// Client configuration.
///
/// Unknown concerns from older configuration surfaces (`no_rehash`,
/// `readonly`) are accepted and ignored.
#[derive(Debug, Clone)]
pub struct Config {
    /// Servers to distribute keys over.
    pub servers: Vec<ServerSpec>,
    /// Prefix prepended to every key on the wire.
    pub namespace: String,
    /// Whether the namespace participates in server selection hashing.
    pub hash_namespace: bool,
    /// Minimum payload size before the compressor engages, in bytes.
    pub compress_threshold: usize,
    /// Which serializer encodes structured values.
    pub serializer: SerializerKind,
    /// Which wire protocol the connections speak.
    pub protocol: ProtocolKind,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Accepted for compatibility; this client never rehashes.
    pub no_rehash: bool,
    /// Accepted for compatibility; has no effect.
    pub readonly: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            servers: Vec::new(),
            namespace: String::new(),
            hash_namespace: true,
            compress_threshold: 10_000,
            serializer: SerializerKind::default(),
            protocol: ProtocolKind::Text,
            connect_timeout: Duration::from_millis(500),
            no_rehash: false,
            readonly: false,
        }
    }
}
