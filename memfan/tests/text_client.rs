//! End-to-end command tests over the text protocol.

mod common;

use memfan::{Client, Config, SerializerKind, Value};
use serde_json::json;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn client_for(servers: &[&common::MockServer]) -> Client {
    init_logging();
    let mut config = Config::default();
    config.servers = servers
        .iter()
        .map(|mock| mock.server_id().parse().unwrap())
        .collect();
    Client::new(config).unwrap()
}

fn text(value: &Value) -> String {
    value.as_str().expect("raw utf-8 value").to_owned()
}

#[tokio::test]
async fn set_get_delete_cycle() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    assert!(client.set("foo", "bar").await);
    assert_eq!(client.get("foo").await.as_ref().map(text), Some("bar".into()));
    assert!(client.delete("foo").await);
    assert_eq!(client.get("foo").await, None);
    // Deleting again misses.
    assert!(!client.delete("foo").await);
}

#[tokio::test]
async fn add_incr_decr_cycle() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    assert!(client.add("k", "1").await);
    assert!(!client.add("k", "2").await);
    assert_eq!(client.incr("k", 1).await, Some(2));
    assert_eq!(client.incr("k", 72).await, Some(74));
    assert_eq!(client.decr("k", 18).await, Some(56));
    assert_eq!(client.get("k").await.as_ref().map(text), Some("56".into()));
}

#[tokio::test]
async fn incr_missing_key() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    assert_eq!(client.incr("absent", 1).await, None);
    // With an initial the counter is created via the follow-up add.
    assert_eq!(client.incr_with_initial("absent", 1, 10).await, Some(10));
    assert_eq!(client.incr("absent", 1).await, Some(11));
}

#[tokio::test]
async fn append_prepend() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    assert!(client.set("bar", "gondola").await);
    assert!(client.append("bar", "gorp").await);
    assert_eq!(
        client.get("bar").await.as_ref().map(text),
        Some("gondolagorp".into())
    );
    assert!(client.prepend("bar", "pre-").await);
    assert_eq!(
        client.get("bar").await.as_ref().map(text),
        Some("pre-gondolagorp".into())
    );
    // Appending to a missing key fails.
    assert!(!client.append("nope", "x").await);
}

#[tokio::test]
async fn replace_only_existing() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    assert!(!client.replace("r", "v1").await);
    assert!(client.set("r", "v1").await);
    assert!(client.replace("r", "v2").await);
    assert_eq!(client.get("r").await.as_ref().map(text), Some("v2".into()));
}

#[tokio::test]
async fn multi_key_round_trip() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    let stored = client
        .set_multi([("a", "1"), ("b", "2"), ("c", "3")])
        .await;
    assert_eq!(stored.len(), 3);
    assert!(stored.values().all(|&ok| ok));

    let hits = client.get_multi(["a", "b", "c", "missing"]).await;
    assert_eq!(hits.len(), 3);
    assert_eq!(hits.get("a").map(text), Some("1".into()));
    assert_eq!(hits.get("b").map(text), Some("2".into()));
    assert_eq!(hits.get("c").map(text), Some("3".into()));
    // The missing key is absent, not present with a null value.
    assert!(!hits.contains_key("missing"));

    let deleted = client.delete_multi(["a", "missing"]).await;
    assert_eq!(deleted.get("a"), Some(&true));
    assert_eq!(deleted.get("missing"), Some(&false));
}

#[tokio::test]
async fn namespace_prefixes_wire_keys() {
    let mock = common::spawn_text().await;
    let mut config = Config::default();
    config.servers = vec![mock.server_id().parse().unwrap()];
    config.namespace = "app:".into();
    let client = Client::new(config).unwrap();

    assert!(client.set("foo", "bar").await);
    // The mock saw the namespaced key; the caller never does.
    assert_eq!(mock.stored("app:foo"), Some(b"bar".to_vec()));
    assert_eq!(client.get("foo").await.as_ref().map(text), Some("bar".into()));

    let hits = client.get_multi(["foo"]).await;
    assert_eq!(hits.get("foo").map(text), Some("bar".into()));
}

#[tokio::test]
async fn large_values_compress_on_the_wire() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    let big = "a".repeat(20_000);
    assert!(client.set("big", big.as_str()).await);

    // On the wire the payload is gzip, well under the 80% bound.
    let stored = mock.stored("big").expect("stored");
    assert!(stored.len() < 16_000, "wire size {}", stored.len());

    // And it comes back expanded.
    assert_eq!(client.get("big").await.as_ref().map(text), Some(big));
}

#[tokio::test]
async fn appended_values_skip_compression() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    let big = "b".repeat(20_000);
    assert!(client.set("seed", "x").await);
    assert!(client.append("seed", big.as_str()).await);

    // The appended bytes went out verbatim.
    let stored = mock.stored("seed").expect("stored");
    assert_eq!(stored.len(), 1 + 20_000);
}

#[tokio::test]
async fn structured_values_round_trip() {
    let mock = common::spawn_text().await;
    let client = client_for(&[&mock]).await;

    let doc = json!({"ids": [1, 2, 3], "name": "fan"});
    assert!(client.set("doc", doc.clone()).await);
    assert_eq!(client.get("doc").await, Some(Value::Structured(doc)));
}

#[tokio::test]
async fn json_serializer_round_trip() {
    let mock = common::spawn_text().await;
    let mut config = Config::default();
    config.servers = vec![mock.server_id().parse().unwrap()];
    config.serializer = SerializerKind::Json;
    let client = Client::new(config).unwrap();

    let doc = json!({"k": "v"});
    assert!(client.set("doc", doc.clone()).await);
    assert_eq!(client.get("doc").await, Some(Value::Structured(doc)));
}

#[tokio::test]
async fn broadcast_commands_hit_every_server() {
    let mock_a = common::spawn_text().await;
    let mock_b = common::spawn_text().await;
    let client = client_for(&[&mock_a, &mock_b]).await;

    let versions = client.version().await;
    assert_eq!(versions.len(), 2);
    assert_eq!(
        versions.get(&mock_a.server_id()),
        Some(&"1.6.0-mock".to_string())
    );

    let stats = client.stats().await;
    assert_eq!(stats.len(), 2);
    assert_eq!(
        stats[&mock_b.server_id()].get("pid"),
        Some(&"1234".to_string())
    );

    // Seed both servers, then flush everything.
    for i in 0..20 {
        client.set(format!("key-{i}"), "x").await;
    }
    let flushed = client.flush_all().await;
    assert!(flushed.values().all(|&ok| ok));
    assert!(mock_a.store.lock().unwrap().is_empty());
    assert!(mock_b.store.lock().unwrap().is_empty());
}

#[tokio::test]
async fn keys_spread_across_servers() {
    let mock_a = common::spawn_text().await;
    let mock_b = common::spawn_text().await;
    let client = client_for(&[&mock_a, &mock_b]).await;

    for i in 0..50 {
        assert!(client.set(format!("spread-{i}"), "x").await);
    }
    let a = mock_a.store.lock().unwrap().len();
    let b = mock_b.store.lock().unwrap().len();
    assert_eq!(a + b, 50);
    assert!(a > 0, "server A received nothing");
    assert!(b > 0, "server B received nothing");
}

#[tokio::test]
async fn prehashed_keys_pin_a_server() {
    let mock_a = common::spawn_text().await;
    let mock_b = common::spawn_text().await;
    let client = client_for(&[&mock_a, &mock_b]).await;

    for i in 0..10 {
        assert!(client.set((0u64, format!("pin-{i}")), "x").await);
    }
    assert_eq!(mock_a.store.lock().unwrap().len(), 10);
    assert!(mock_b.store.lock().unwrap().is_empty());
}
