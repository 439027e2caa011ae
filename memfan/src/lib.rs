//! memfan - an asynchronous memcached client.
//!
//! The client distributes keys over a weighted list of servers, speaks
//! either the text or the binary wire protocol, and pushes every value
//! through pluggable serializer and compressor strategies before it hits
//! the wire.
//!
//! Each configured server is owned by a connection with a FIFO request
//! queue and a single in-flight slot: requests on one connection dispatch
//! and complete strictly in order, reconnects after a dropped socket replay
//! the active request, and a server that stays unreachable fails its whole
//! queue with per-command default results rather than errors.
//!
//! ```no_run
//! # async fn example() -> Result<(), memfan::Error> {
//! use memfan::{Client, Config};
//!
//! let mut config = Config::default();
//! config.servers = vec![
//!     "cache-a.internal:11211".parse()?,
//!     "cache-b.internal:11211".parse()?,
//! ];
//! let client = Client::new(config)?;
//!
//! client.set("session:42", "state").await;
//! let hits = client.get_multi(["session:42", "session:43"]).await;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```
//!
//! Synchronous callers can use [`sync::Client`], which drives a private
//! runtime per call and refuses (loudly) to run inside another runtime.

mod client;
mod command;
mod compressor;
mod config;
mod connection;
mod error;
mod key;
mod protocol;
mod selector;
mod serializer;
pub mod sync;
mod value;

pub use client::{Client, Preprocessor};
pub use command::StoreVerb;
pub use compressor::{Compressor, GzipCompressor};
pub use config::{Config, DEFAULT_PORT, SerializerKind, ServerSpec};
pub use error::Error;
pub use key::{Key, MAX_KEY_LEN};
pub use protocol::ProtocolKind;
pub use selector::{Selector, TraditionalSelector};
pub use serializer::{JsonSerializer, Serializer, StructuredSerializer};
pub use value::{FLAG_GZIP, FLAG_JSON, FLAG_STRUCTURED, Payload, Value};
