//! Weighted CRC32 bucket ring.
//!
//! The traditional memcached client mapping: the ring is a flat list of
//! buckets built by repeating each node index `weight` times, and a key is
//! routed by `crc32(key) mod ring_len`. This keeps a node with weight 2 on
//! twice as many buckets as a node with weight 1, at the cost of remapping
//! most keys when the node list changes - the trade-off the traditional
//! selector makes deliberately.
//!
//! A pre-computed bucket index can be routed directly, bypassing the hash.

/// Immutable weighted bucket ring mapping hash inputs to node indices.
#[derive(Clone, Debug)]
pub struct Ring {
    /// One entry per bucket, holding the owning node index.
    buckets: Box<[u16]>,
    node_count: u16,
}

impl Ring {
    /// Build a ring from per-node weights, in node order.
    ///
    /// A node with weight `w` occupies `w` consecutive buckets. Nodes with
    /// weight 0 get no buckets and never receive keys.
    pub fn build(weights: &[u32]) -> Self {
        let mut buckets = Vec::new();
        for (node, &weight) in weights.iter().enumerate() {
            for _ in 0..weight {
                buckets.push(node as u16);
            }
        }
        Ring {
            buckets: buckets.into_boxed_slice(),
            node_count: weights.len() as u16,
        }
    }

    /// Route a hash input to a node index, or `None` for an empty ring.
    #[inline]
    pub fn route(&self, input: &[u8]) -> Option<usize> {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = crc32fast::hash(input) as usize;
        Some(self.buckets[hash % self.buckets.len()] as usize)
    }

    /// Route a pre-computed bucket index to a node index, bypassing the hash.
    #[inline]
    pub fn route_index(&self, index: u64) -> Option<usize> {
        if self.buckets.is_empty() {
            return None;
        }
        Some(self.buckets[(index % self.buckets.len() as u64) as usize] as usize)
    }

    /// Number of logical nodes the ring was built from.
    pub fn node_count(&self) -> usize {
        self.node_count as usize
    }

    /// Total number of buckets (the sum of the weights).
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
