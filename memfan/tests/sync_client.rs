//! Blocking facade tests.

mod common;

use std::sync::mpsc;

use memfan::Config;
use memfan::sync::Client;

/// The blocking client owns its runtime, so the mock needs one of its own
/// on a background thread.
fn spawn_mock_on_thread() -> String {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("mock runtime");
        runtime.block_on(async move {
            let mock = common::spawn_text().await;
            tx.send(mock.server_id()).expect("report addr");
            // Keep serving until the test process exits.
            futures::future::pending::<()>().await;
        });
    });
    rx.recv().expect("mock addr")
}

fn blocking_client(server: String) -> Client {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = Config::default();
    config.servers = vec![server.parse().unwrap()];
    Client::new(config).unwrap()
}

#[test]
fn blocking_round_trip() {
    let client = blocking_client(spawn_mock_on_thread());

    assert!(client.set("sync-key", "sync-value"));
    assert_eq!(
        client.get("sync-key").and_then(|v| v.as_str().map(str::to_owned)),
        Some("sync-value".to_owned())
    );
    assert!(client.delete("sync-key"));
    assert_eq!(client.get("sync-key"), None);
}

#[test]
fn blocking_counters_and_multi() {
    let client = blocking_client(spawn_mock_on_thread());

    assert!(client.add("n", "10"));
    assert_eq!(client.incr("n", 5), Some(15));
    assert_eq!(client.decr("n", 3), Some(12));

    let stored = client.set_multi([("x", "1"), ("y", "2")]);
    assert!(stored.values().all(|&ok| ok));
    let hits = client.get_multi(["x", "y", "z"]);
    assert_eq!(hits.len(), 2);

    let versions = client.version();
    assert_eq!(versions.len(), 1);
}

#[test]
#[should_panic(expected = "inside an async runtime")]
fn blocking_inside_async_context_panics() {
    let client = blocking_client(spawn_mock_on_thread());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async move {
        // A synchronous wait inside a driven runtime must fail loudly
        // rather than deadlock.
        client.get("boom");
    });
}
