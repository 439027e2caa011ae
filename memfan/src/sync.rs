//! Blocking facade over the async client.
//!
//! Each call drives a private current-thread runtime until its one request
//! completes. Calling into this facade from inside an async runtime would
//! park that runtime's thread on itself, so it is detected and rejected
//! loudly instead of deadlocking.

use std::collections::HashMap;
use std::future::Future;

use crate::config::{Config, ServerSpec};
use crate::error::Error;
use crate::key::Key;
use crate::value::Value;

/// A blocking memcached client for synchronous callers.
pub struct Client {
    inner: crate::Client,
    runtime: tokio::runtime::Runtime,
}

impl Client {
    /// Build a blocking client from a configuration.
    pub fn new(config: Config) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Client {
            inner: crate::Client::new(config)?,
            runtime,
        })
    }

    /// The wrapped async client.
    pub fn inner(&self) -> &crate::Client {
        &self.inner
    }

    fn wait<F: Future>(&self, fut: F) -> F::Output {
        if tokio::runtime::Handle::try_current().is_ok() {
            panic!(
                "memfan::sync::Client called from inside an async runtime; \
                 this would deadlock the runtime - use memfan::Client instead"
            );
        }
        self.runtime.block_on(fut)
    }

    pub fn set_servers(&mut self, servers: &[ServerSpec]) -> Result<(), Error> {
        self.inner.set_servers(servers)
    }

    pub fn connect(&self) -> bool {
        self.wait(self.inner.connect())
    }

    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.inner.set_namespace(namespace);
    }

    pub fn hash_namespace(&self) -> bool {
        self.inner.hash_namespace()
    }

    pub fn set_hash_namespace(&mut self, hash_namespace: bool) {
        self.inner.set_hash_namespace(hash_namespace);
    }

    pub fn compress_threshold(&self) -> usize {
        self.inner.compress_threshold()
    }

    pub fn set_compress_threshold(&mut self, bytes: usize) {
        self.inner.set_compress_threshold(bytes);
    }

    pub fn set_preprocessor(
        &mut self,
        preprocessor: impl Fn(&str) -> String + Send + Sync + 'static,
    ) {
        self.inner.set_preprocessor(preprocessor);
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.wait(self.inner.get(key))
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        self.wait(self.inner.set(key, value))
    }

    pub fn set_with_exptime(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        exptime: u32,
    ) -> bool {
        self.wait(self.inner.set_with_exptime(key, value, exptime))
    }

    pub fn add(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        self.wait(self.inner.add(key, value))
    }

    pub fn replace(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        self.wait(self.inner.replace(key, value))
    }

    pub fn append(&self, key: impl Into<Key>, data: impl Into<Vec<u8>>) -> bool {
        self.wait(self.inner.append(key, data))
    }

    pub fn prepend(&self, key: impl Into<Key>, data: impl Into<Vec<u8>>) -> bool {
        self.wait(self.inner.prepend(key, data))
    }

    pub fn delete(&self, key: impl Into<Key>) -> bool {
        self.wait(self.inner.delete(key))
    }

    /// Alias for [`delete`](Self::delete).
    pub fn remove(&self, key: impl Into<Key>) -> bool {
        self.wait(self.inner.remove(key))
    }

    pub fn incr(&self, key: impl Into<Key>, delta: u64) -> Option<u64> {
        self.wait(self.inner.incr(key, delta))
    }

    pub fn incr_with_initial(&self, key: impl Into<Key>, delta: u64, initial: u64) -> Option<u64> {
        self.wait(self.inner.incr_with_initial(key, delta, initial))
    }

    pub fn decr(&self, key: impl Into<Key>, delta: u64) -> Option<u64> {
        self.wait(self.inner.decr(key, delta))
    }

    pub fn decr_with_initial(&self, key: impl Into<Key>, delta: u64, initial: u64) -> Option<u64> {
        self.wait(self.inner.decr_with_initial(key, delta, initial))
    }

    pub fn get_multi<K>(&self, keys: impl IntoIterator<Item = K>) -> HashMap<String, Value>
    where
        K: Into<Key>,
    {
        self.wait(self.inner.get_multi(keys))
    }

    pub fn set_multi<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> HashMap<String, bool>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.wait(self.inner.set_multi(pairs))
    }

    pub fn delete_multi<K>(&self, keys: impl IntoIterator<Item = K>) -> HashMap<String, bool>
    where
        K: Into<Key>,
    {
        self.wait(self.inner.delete_multi(keys))
    }

    pub fn incr_multi<K>(&self, keys: impl IntoIterator<Item = K>, delta: u64) -> HashMap<String, u64>
    where
        K: Into<Key>,
    {
        self.wait(self.inner.incr_multi(keys, delta))
    }

    pub fn decr_multi<K>(&self, keys: impl IntoIterator<Item = K>, delta: u64) -> HashMap<String, u64>
    where
        K: Into<Key>,
    {
        self.wait(self.inner.decr_multi(keys, delta))
    }

    pub fn flush_all(&self) -> HashMap<String, bool> {
        self.wait(self.inner.flush_all())
    }

    pub fn stats(&self) -> HashMap<String, HashMap<String, String>> {
        self.wait(self.inner.stats())
    }

    pub fn version(&self) -> HashMap<String, String> {
        self.wait(self.inner.version())
    }
}
