//! The asynchronous client facade.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;

use crate::command::{Command, Reply, StoreVerb};
use crate::compressor::{Compressor, GzipCompressor};
use crate::config::{Config, SerializerKind, ServerSpec};
use crate::connection::{ConnHandle, ConnOptions};
use crate::error::Error;
use crate::key::{self, Key};
use crate::selector::{Selector, TraditionalSelector};
use crate::serializer::{JsonSerializer, Serializer, StructuredSerializer};
use crate::value::{Payload, Value};

/// Key transformer applied before validation and namespacing.
pub type Preprocessor = dyn Fn(&str) -> String + Send + Sync;

/// An asynchronous memcached client.
///
/// The client owns one connection per configured server and routes each key
/// through the selector. Command methods never return errors: a request
/// that cannot be dispatched, times out terminally or is rejected by the
/// server completes with the command's default - `false` for boolean
/// commands, `None` for value commands, an empty map for aggregates.
/// Connection-level failures are reported through the `log` facade.
///
/// ```no_run
/// # async fn example() -> Result<(), memfan::Error> {
/// use memfan::{Client, Config};
///
/// let mut config = Config::default();
/// config.servers = vec!["127.0.0.1:11211".parse()?];
/// let client = Client::new(config)?;
///
/// assert!(client.set("greeting", "hello").await);
/// let value = client.get("greeting").await;
/// assert_eq!(value.and_then(|v| v.as_str().map(str::to_owned)), Some("hello".into()));
/// # Ok(())
/// # }
/// ```
pub struct Client {
    servers: Vec<ServerSpec>,
    connections: Vec<Arc<ConnHandle>>,
    selector: Box<dyn Selector>,
    serializer: Box<dyn Serializer>,
    compressor: Box<dyn Compressor>,
    preprocessor: Option<Box<Preprocessor>>,
    namespace: String,
    hash_namespace: bool,
    opts: ConnOptions,
}

impl Client {
    /// Build a client from a configuration.
    pub fn new(config: Config) -> Result<Self, Error> {
        let serializer: Box<dyn Serializer> = match config.serializer {
            SerializerKind::Structured => Box::new(StructuredSerializer),
            SerializerKind::Json => Box::new(JsonSerializer),
        };
        let mut client = Client {
            servers: Vec::new(),
            connections: Vec::new(),
            selector: Box::new(TraditionalSelector::new(&[])),
            serializer,
            compressor: Box::new(GzipCompressor::new(config.compress_threshold)),
            preprocessor: None,
            namespace: config.namespace,
            hash_namespace: config.hash_namespace,
            opts: ConnOptions {
                connect_timeout: config.connect_timeout,
                protocol: config.protocol,
            },
        };
        client.set_servers(&config.servers)?;
        Ok(client)
    }

    /// Replace the server list. Connections for servers no longer present
    /// are closed; connections for surviving servers are kept as they are.
    pub fn set_servers(&mut self, servers: &[ServerSpec]) -> Result<(), Error> {
        for spec in servers {
            if spec.weight == 0 {
                return Err(Error::ZeroWeight(spec.id.clone()));
            }
        }

        let mut kept = Vec::with_capacity(servers.len());
        for spec in servers {
            let existing = self.connections.iter().find(|h| h.server() == spec.id);
            match existing {
                Some(handle) => kept.push(handle.clone()),
                None => kept.push(Arc::new(ConnHandle::new(spec.id.clone(), self.opts.clone()))),
            }
        }
        for handle in &self.connections {
            if !servers.iter().any(|s| s.id == handle.server()) {
                handle.disconnect();
            }
        }

        self.connections = kept;
        self.servers = servers.to_vec();
        self.selector.set_servers(servers);
        Ok(())
    }

    /// Eagerly open every connection. Returns true when all servers
    /// accepted.
    pub async fn connect(&self) -> bool {
        let acks: Vec<oneshot::Receiver<bool>> =
            self.connections.iter().map(|h| h.connect()).collect();
        join_all(acks)
            .await
            .into_iter()
            .all(|ack| ack.unwrap_or(false))
    }

    /// Close every connection, completing queued and in-flight requests
    /// with their defaults.
    pub fn disconnect(&self) {
        for handle in &self.connections {
            handle.disconnect();
        }
    }

    // -- Tunables ------------------------------------------------------------

    /// The namespace prefixed to every wire key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
    }

    /// Whether the namespace participates in server selection.
    pub fn hash_namespace(&self) -> bool {
        self.hash_namespace
    }

    pub fn set_hash_namespace(&mut self, hash_namespace: bool) {
        self.hash_namespace = hash_namespace;
    }

    /// The compressor's engagement threshold in bytes.
    pub fn compress_threshold(&self) -> usize {
        self.compressor.threshold()
    }

    pub fn set_compress_threshold(&mut self, bytes: usize) {
        self.compressor.set_threshold(bytes);
    }

    /// Install a key transformer run before validation and namespacing.
    pub fn set_preprocessor(&mut self, preprocessor: impl Fn(&str) -> String + Send + Sync + 'static) {
        self.preprocessor = Some(Box::new(preprocessor));
    }

    /// Swap in a custom serializer.
    pub fn set_serializer(&mut self, serializer: Box<dyn Serializer>) {
        self.serializer = serializer;
    }

    /// Swap in a custom compressor.
    pub fn set_compressor(&mut self, compressor: Box<dyn Compressor>) {
        self.compressor = compressor;
    }

    /// Swap in a custom selector; it is fed the current server list.
    pub fn set_selector(&mut self, mut selector: Box<dyn Selector>) {
        selector.set_servers(&self.servers);
        self.selector = selector;
    }

    // -- Single-key commands -------------------------------------------------

    /// Fetch a key. `None` on miss or failure.
    pub async fn get(&self, key: impl Into<Key>) -> Option<Value> {
        let (handle, wire, _) = self.route(key.into())?;
        let rx = handle.submit(Command::Get { keys: vec![wire] });
        match rx.await {
            Ok(Reply::Values(values)) => {
                let (_, flags, data) = values.into_iter().next()?;
                self.revive(Payload { data, flags })
            }
            _ => None,
        }
    }

    /// Store a value unconditionally.
    pub async fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        self.store(StoreVerb::Set, key.into(), value.into(), 0).await
    }

    /// Store a value unconditionally with an expiration time in seconds.
    pub async fn set_with_exptime(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        exptime: u32,
    ) -> bool {
        self.store(StoreVerb::Set, key.into(), value.into(), exptime).await
    }

    /// Store a value only if the key does not exist.
    pub async fn add(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        self.store(StoreVerb::Add, key.into(), value.into(), 0).await
    }

    pub async fn add_with_exptime(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        exptime: u32,
    ) -> bool {
        self.store(StoreVerb::Add, key.into(), value.into(), exptime).await
    }

    /// Store a value only if the key already exists.
    pub async fn replace(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        self.store(StoreVerb::Replace, key.into(), value.into(), 0).await
    }

    pub async fn replace_with_exptime(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        exptime: u32,
    ) -> bool {
        self.store(StoreVerb::Replace, key.into(), value.into(), exptime).await
    }

    /// Append bytes to a stored value. The data is concatenated verbatim,
    /// so it is never serialised or compressed.
    pub async fn append(&self, key: impl Into<Key>, data: impl Into<Vec<u8>>) -> bool {
        self.concat(StoreVerb::Append, key.into(), data.into()).await
    }

    /// Prepend bytes to a stored value. Never serialised or compressed.
    pub async fn prepend(&self, key: impl Into<Key>, data: impl Into<Vec<u8>>) -> bool {
        self.concat(StoreVerb::Prepend, key.into(), data.into()).await
    }

    /// Delete a key. True iff the server had it.
    pub async fn delete(&self, key: impl Into<Key>) -> bool {
        let Some((handle, wire, _)) = self.route(key.into()) else {
            return false;
        };
        let rx = handle.submit(Command::Delete { key: wire });
        matches!(rx.await, Ok(Reply::Deleted(true)))
    }

    /// Alias for [`delete`](Self::delete).
    pub async fn remove(&self, key: impl Into<Key>) -> bool {
        self.delete(key).await
    }

    /// Increment a counter. `None` when the key does not exist.
    pub async fn incr(&self, key: impl Into<Key>, delta: u64) -> Option<u64> {
        self.counter(true, key.into(), delta, None).await
    }

    /// Increment a counter, creating it with `initial` if absent.
    pub async fn incr_with_initial(
        &self,
        key: impl Into<Key>,
        delta: u64,
        initial: u64,
    ) -> Option<u64> {
        self.counter(true, key.into(), delta, Some(initial)).await
    }

    /// Decrement a counter. `None` when the key does not exist.
    pub async fn decr(&self, key: impl Into<Key>, delta: u64) -> Option<u64> {
        self.counter(false, key.into(), delta, None).await
    }

    /// Decrement a counter, creating it with `initial` if absent.
    pub async fn decr_with_initial(
        &self,
        key: impl Into<Key>,
        delta: u64,
        initial: u64,
    ) -> Option<u64> {
        self.counter(false, key.into(), delta, Some(initial)).await
    }

    // -- Multi-key commands --------------------------------------------------

    /// Fetch many keys at once. Keys are grouped by owning server and each
    /// server receives one multi-key get. The result maps each real key to
    /// its value; misses and failures are simply absent.
    pub async fn get_multi<K>(&self, keys: impl IntoIterator<Item = K>) -> HashMap<String, Value>
    where
        K: Into<Key>,
    {
        let mut by_server: Vec<(Arc<ConnHandle>, Vec<Vec<u8>>)> = Vec::new();
        let mut real_by_wire: HashMap<Vec<u8>, String> = HashMap::new();
        for key in keys {
            if let Some((handle, wire, real)) = self.route(key.into()) {
                real_by_wire.insert(wire.clone(), real);
                match by_server.iter_mut().find(|(h, _)| Arc::ptr_eq(h, &handle)) {
                    Some((_, group)) => group.push(wire),
                    None => by_server.push((handle, vec![wire])),
                }
            }
        }

        let pending: Vec<_> = by_server
            .into_iter()
            .map(|(handle, group)| handle.submit(Command::Get { keys: group }))
            .collect();

        let mut results = HashMap::new();
        for reply in join_all(pending).await {
            if let Ok(Reply::Values(values)) = reply {
                for (wire, flags, data) in values {
                    let Some(real) = real_by_wire.get(&wire) else {
                        continue;
                    };
                    if let Some(value) = self.revive(Payload { data, flags }) {
                        results.insert(real.clone(), value);
                    }
                }
            }
        }
        results
    }

    /// Store many pairs. The result maps each real key to whether it stored.
    pub async fn set_multi<K, V>(
        &self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> HashMap<String, bool>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.store_multi(StoreVerb::Set, pairs).await
    }

    /// Add many pairs; each stores only if its key is absent.
    pub async fn add_multi<K, V>(
        &self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> HashMap<String, bool>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.store_multi(StoreVerb::Add, pairs).await
    }

    /// Replace many pairs; each stores only if its key exists.
    pub async fn replace_multi<K, V>(
        &self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> HashMap<String, bool>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.store_multi(StoreVerb::Replace, pairs).await
    }

    /// Append to many keys. Data is concatenated verbatim.
    pub async fn append_multi<K, D>(
        &self,
        pairs: impl IntoIterator<Item = (K, D)>,
    ) -> HashMap<String, bool>
    where
        K: Into<Key>,
        D: Into<Vec<u8>>,
    {
        self.concat_multi(StoreVerb::Append, pairs).await
    }

    /// Prepend to many keys. Data is concatenated verbatim.
    pub async fn prepend_multi<K, D>(
        &self,
        pairs: impl IntoIterator<Item = (K, D)>,
    ) -> HashMap<String, bool>
    where
        K: Into<Key>,
        D: Into<Vec<u8>>,
    {
        self.concat_multi(StoreVerb::Prepend, pairs).await
    }

    /// Delete many keys. The result maps each real key to whether the
    /// server had it.
    pub async fn delete_multi<K>(&self, keys: impl IntoIterator<Item = K>) -> HashMap<String, bool>
    where
        K: Into<Key>,
    {
        let mut map = HashMap::new();
        let mut pending = Vec::new();
        for key in keys {
            let key = key.into();
            match self.route(key) {
                Some((handle, wire, real)) => {
                    let rx = handle.submit(Command::Delete { key: wire });
                    pending.push((real, rx));
                }
                None => {}
            }
        }
        for (real, reply) in join_all(
            pending
                .into_iter()
                .map(|(real, rx)| async move { (real, rx.await) }),
        )
        .await
        {
            map.insert(real, matches!(reply, Ok(Reply::Deleted(true))));
        }
        map
    }

    /// Increment many counters by the same delta. Only existing counters
    /// appear in the result.
    pub async fn incr_multi<K>(
        &self,
        keys: impl IntoIterator<Item = K>,
        delta: u64,
    ) -> HashMap<String, u64>
    where
        K: Into<Key>,
    {
        self.counter_multi(true, keys, delta).await
    }

    /// Decrement many counters by the same delta.
    pub async fn decr_multi<K>(
        &self,
        keys: impl IntoIterator<Item = K>,
        delta: u64,
    ) -> HashMap<String, u64>
    where
        K: Into<Key>,
    {
        self.counter_multi(false, keys, delta).await
    }

    // -- Broadcast commands --------------------------------------------------

    /// Flush every server. The result maps server identifiers to whether
    /// the server acknowledged.
    pub async fn flush_all(&self) -> HashMap<String, bool> {
        self.broadcast_flush(None).await
    }

    /// Flush every server after `delay` seconds.
    pub async fn flush_all_with_delay(&self, delay: u32) -> HashMap<String, bool> {
        self.broadcast_flush(Some(delay)).await
    }

    /// Collect statistics from every server.
    pub async fn stats(&self) -> HashMap<String, HashMap<String, String>> {
        self.broadcast_stats(None).await
    }

    /// Collect a named statistics group from every server.
    pub async fn stats_arg(&self, arg: &str) -> HashMap<String, HashMap<String, String>> {
        self.broadcast_stats(Some(arg.to_owned())).await
    }

    /// Ask every server for its version string. Unreachable servers are
    /// absent from the result.
    pub async fn version(&self) -> HashMap<String, String> {
        let replies = self
            .broadcast(|_| Command::Version)
            .await;
        let mut map = HashMap::new();
        for (server, reply) in replies {
            if let Ok(Reply::Version(Some(version))) = reply {
                map.insert(server, version);
            }
        }
        map
    }

    // -- Plumbing ------------------------------------------------------------

    /// The submission pipeline: preprocess, validate, namespace, select.
    fn route(&self, key: Key) -> Option<(Arc<ConnHandle>, Vec<u8>, String)> {
        let real = match &self.preprocessor {
            Some(preprocess) => preprocess(key.real()),
            None => key.real().to_owned(),
        };
        if !key::valid(&real) {
            return None;
        }
        let key = key.with_real(real);

        let hash_namespace = if self.hash_namespace {
            self.namespace.as_str()
        } else {
            ""
        };
        let server = self.selector.select(&key, hash_namespace)?;
        let handle = self
            .connections
            .iter()
            .find(|h| h.server() == server)?
            .clone();

        let mut wire = Vec::with_capacity(self.namespace.len() + key.real().len());
        wire.extend_from_slice(self.namespace.as_bytes());
        wire.extend_from_slice(key.real().as_bytes());

        let real = match key {
            Key::Plain(real) | Key::Hashed { key: real, .. } => real,
        };
        Some((handle, wire, real))
    }

    /// Undo transport transformations: decompress, then deserialise.
    fn revive(&self, payload: Payload) -> Option<Value> {
        let payload = self.compressor.decompress(payload)?;
        self.serializer.deserialize(payload)
    }

    async fn store(&self, verb: StoreVerb, key: Key, value: Value, exptime: u32) -> bool {
        let Some((handle, wire, _)) = self.route(key) else {
            return false;
        };
        let Some(payload) = self.serializer.serialize(&value) else {
            return false;
        };
        let payload = self.compressor.compress(payload, verb);
        let rx = handle.submit(Command::Store {
            verb,
            key: wire,
            data: payload.data,
            flags: payload.flags,
            exptime,
        });
        matches!(rx.await, Ok(Reply::Stored(true)))
    }

    async fn concat(&self, verb: StoreVerb, key: Key, data: Vec<u8>) -> bool {
        let Some((handle, wire, _)) = self.route(key) else {
            return false;
        };
        let rx = handle.submit(Command::Store {
            verb,
            key: wire,
            data,
            flags: 0,
            exptime: 0,
        });
        matches!(rx.await, Ok(Reply::Stored(true)))
    }

    async fn counter(&self, incr: bool, key: Key, delta: u64, initial: Option<u64>) -> Option<u64> {
        let (handle, wire, _) = self.route(key)?;
        let rx = handle.submit(Command::Counter {
            incr,
            key: wire,
            delta,
            initial,
        });
        match rx.await {
            Ok(Reply::Number(value)) => value,
            _ => None,
        }
    }

    async fn store_multi<K, V>(
        &self,
        verb: StoreVerb,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> HashMap<String, bool>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        let mut map = HashMap::new();
        let mut pending = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            match self.route(key) {
                Some((handle, wire, real)) => match self.serializer.serialize(&value) {
                    Some(payload) => {
                        let payload = self.compressor.compress(payload, verb);
                        let rx = handle.submit(Command::Store {
                            verb,
                            key: wire,
                            data: payload.data,
                            flags: payload.flags,
                            exptime: 0,
                        });
                        pending.push((real, rx));
                    }
                    None => {
                        map.insert(real, false);
                    }
                },
                None => {}
            }
        }
        for (real, reply) in join_all(
            pending
                .into_iter()
                .map(|(real, rx)| async move { (real, rx.await) }),
        )
        .await
        {
            map.insert(real, matches!(reply, Ok(Reply::Stored(true))));
        }
        map
    }

    async fn concat_multi<K, D>(
        &self,
        verb: StoreVerb,
        pairs: impl IntoIterator<Item = (K, D)>,
    ) -> HashMap<String, bool>
    where
        K: Into<Key>,
        D: Into<Vec<u8>>,
    {
        let mut pending = Vec::new();
        for (key, data) in pairs {
            if let Some((handle, wire, real)) = self.route(key.into()) {
                let rx = handle.submit(Command::Store {
                    verb,
                    key: wire,
                    data: data.into(),
                    flags: 0,
                    exptime: 0,
                });
                pending.push((real, rx));
            }
        }
        let mut map = HashMap::new();
        for (real, reply) in join_all(
            pending
                .into_iter()
                .map(|(real, rx)| async move { (real, rx.await) }),
        )
        .await
        {
            map.insert(real, matches!(reply, Ok(Reply::Stored(true))));
        }
        map
    }

    async fn counter_multi<K>(
        &self,
        incr: bool,
        keys: impl IntoIterator<Item = K>,
        delta: u64,
    ) -> HashMap<String, u64>
    where
        K: Into<Key>,
    {
        let mut pending = Vec::new();
        for key in keys {
            if let Some((handle, wire, real)) = self.route(key.into()) {
                let rx = handle.submit(Command::Counter {
                    incr,
                    key: wire,
                    delta,
                    initial: None,
                });
                pending.push((real, rx));
            }
        }
        let mut map = HashMap::new();
        for (real, reply) in join_all(
            pending
                .into_iter()
                .map(|(real, rx)| async move { (real, rx.await) }),
        )
        .await
        {
            if let Ok(Reply::Number(Some(value))) = reply {
                map.insert(real, value);
            }
        }
        map
    }

    async fn broadcast_flush(&self, delay: Option<u32>) -> HashMap<String, bool> {
        let replies = self.broadcast(|_| Command::FlushAll { delay }).await;
        replies
            .into_iter()
            .map(|(server, reply)| (server, matches!(reply, Ok(Reply::Ok(true)))))
            .collect()
    }

    async fn broadcast_stats(&self, arg: Option<String>) -> HashMap<String, HashMap<String, String>> {
        let replies = self
            .broadcast(|_| Command::Stats { arg: arg.clone() })
            .await;
        replies
            .into_iter()
            .map(|(server, reply)| {
                let stats = match reply {
                    Ok(Reply::Stats(pairs)) => pairs.into_iter().collect(),
                    _ => HashMap::new(),
                };
                (server, stats)
            })
            .collect()
    }

    /// Send one child request per configured connection and join them all.
    async fn broadcast(
        &self,
        command: impl Fn(&str) -> Command,
    ) -> Vec<(String, Result<Reply, oneshot::error::RecvError>)> {
        let pending: Vec<_> = self
            .connections
            .iter()
            .map(|handle| {
                let server = handle.server().to_owned();
                let rx = handle.submit(command(handle.server()));
                (server, rx)
            })
            .collect();
        join_all(
            pending
                .into_iter()
                .map(|(server, rx)| async move { (server, rx.await) }),
        )
        .await
    }
}
