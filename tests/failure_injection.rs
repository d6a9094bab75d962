//! Failure injection tests: backend faults, scanner outages and client
//! cancellation must all end with the admission ticket returned.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::{json, Value};

mod common;

use common::{client, guard_config, scanner, start_guard, start_mock_backend, MockBehavior};

fn dead_port() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_backend_server_error_is_upstream_error() {
    let (backend, record) = start_mock_backend(MockBehavior::default()).await;
    let guard = start_guard(guard_config(backend)).await;

    let res = client()
        .post(guard.url("/v1/completions"))
        .json(&json!({ "prompt": "hi" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upstream_error");
    assert_eq!(record.hits.load(Ordering::SeqCst), 1);
    assert!(guard.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(guard.orchestrator.admission().stats().total_admitted, 1);
}

#[tokio::test]
async fn test_unreachable_backend() {
    let guard = start_guard(guard_config(dead_port())).await;

    let res = client()
        .post(guard.url("/api/generate"))
        .json(&json!({ "prompt": "hi" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upstream_error");
    assert!(guard.wait_idle(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let (backend, _) = start_mock_backend(MockBehavior {
        delay: Duration::from_millis(1500),
        ..MockBehavior::default()
    })
    .await;
    let mut config = guard_config(backend);
    config.backend.request_timeout_secs = 1;
    let guard = start_guard(config).await;

    let res = client()
        .post(guard.url("/api/generate"))
        .json(&json!({ "prompt": "hi" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upstream_error");
    assert!(guard.wait_idle(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_scanner_outage_policy() {
    let (backend, record) = start_mock_backend(MockBehavior::default()).await;
    let remote = scanner("Remote", json!({ "url": format!("http://{}/check", dead_port()) }));

    let mut blocking = guard_config(backend);
    blocking.scanners.input.scanners = vec![remote.clone()];
    blocking.scanners.input.block_on_scanner_error = true;
    let guard = start_guard(blocking).await;

    let res = client()
        .post(guard.url("/api/generate"))
        .json(&json!({ "prompt": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    assert!(res.headers().contains_key("retry-after"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "scanner_error");
    assert_eq!(record.hits.load(Ordering::SeqCst), 0);

    let mut lenient = guard_config(backend);
    lenient.scanners.input.scanners = vec![remote];
    lenient.scanners.input.block_on_scanner_error = false;
    let guard = start_guard(lenient).await;

    let res = client()
        .post(guard.url("/api/generate"))
        .json(&json!({ "prompt": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(record.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_disconnect_mid_stream_releases_ticket() {
    let (backend, _) = start_mock_backend(MockBehavior {
        chunks: (0..50).map(|i| format!("token{} ", i)).collect(),
        chunk_delay: Duration::from_millis(100),
        ..MockBehavior::default()
    })
    .await;
    let mut config = guard_config(backend);
    config.admission.max_parallel = 1;
    let guard = start_guard(config).await;

    let mut res = client()
        .post(guard.url("/api/chat"))
        .json(&json!({ "messages": [{ "role": "user", "content": "go" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.chunk().await.unwrap().is_some());
    assert_eq!(guard.orchestrator.admission().active(), 1);
    drop(res);

    assert!(
        guard.wait_idle(Duration::from_secs(3)).await,
        "ticket should be released after the client went away"
    );
}

#[tokio::test]
async fn test_client_disconnect_while_queued_leaves_no_waiter() {
    let (backend, _) = start_mock_backend(MockBehavior {
        delay: Duration::from_millis(800),
        ..MockBehavior::default()
    })
    .await;
    let mut config = guard_config(backend);
    config.admission.max_parallel = 1;
    let guard = start_guard(config).await;

    let url = guard.url("/api/generate");
    let first = tokio::spawn({
        let url = url.clone();
        async move { client().post(url).json(&json!({ "prompt": "first" })).send().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let impatient = client()
        .post(&url)
        .timeout(Duration::from_millis(200))
        .json(&json!({ "prompt": "second" }))
        .send()
        .await;
    assert!(impatient.is_err());

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), 200);
    assert!(guard.wait_idle(Duration::from_secs(3)).await);

    let stats = guard.orchestrator.admission().stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active, 0);
}
