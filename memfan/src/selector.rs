//! Server selectors.

use memfan_ring::Ring;

use crate::config::ServerSpec;
use crate::key::Key;

/// Map a key to one of the configured servers.
///
/// Selectors do not track liveness and never rehash around a failed server;
/// a request routed to a dead server fails with its default.
pub trait Selector: Send + Sync {
    /// Replace the server list.
    fn set_servers(&mut self, servers: &[ServerSpec]);

    /// Pick the server for a key, or `None` when no servers are configured.
    ///
    /// `hash_namespace` is the namespace portion of the hash input; pass an
    /// empty string when the namespace should not influence selection.
    fn select(&self, key: &Key, hash_namespace: &str) -> Option<&str>;
}

/// The traditional selector: a weighted CRC32 bucket ring.
///
/// Pre-hashed keys index the ring directly with their bucket index.
#[derive(Debug)]
pub struct TraditionalSelector {
    servers: Vec<String>,
    ring: Ring,
}

impl TraditionalSelector {
    pub fn new(servers: &[ServerSpec]) -> Self {
        let mut selector = TraditionalSelector {
            servers: Vec::new(),
            ring: Ring::build(&[]),
        };
        selector.set_servers(servers);
        selector
    }
}

impl Selector for TraditionalSelector {
    fn set_servers(&mut self, servers: &[ServerSpec]) {
        self.servers = servers.iter().map(|s| s.id.clone()).collect();
        let weights: Vec<u32> = servers.iter().map(|s| s.weight).collect();
        self.ring = Ring::build(&weights);
    }

    fn select(&self, key: &Key, hash_namespace: &str) -> Option<&str> {
        let node = match key.index() {
            Some(index) => self.ring.route_index(index)?,
            None => {
                let mut input = Vec::with_capacity(hash_namespace.len() + key.real().len());
                input.extend_from_slice(hash_namespace.as_bytes());
                input.extend_from_slice(key.real().as_bytes());
                self.ring.route(&input)?
            }
        };
        self.servers.get(node).map(String::as_str)
    }
}
