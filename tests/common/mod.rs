//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::{stream, StreamExt};
use guard_proxy::config::{GuardConfig, PipelineConfig, ScannerSpec};
use guard_proxy::{HttpServer, Orchestrator, Shutdown};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Behaviour of the mock backend.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Delay before response headers are sent.
    pub delay: Duration,
    /// Text chunks of a streamed answer.
    pub chunks: Vec<String>,
    /// Pause between two streamed chunks.
    pub chunk_delay: Duration,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            chunks: vec!["Hello ".to_string(), "from ".to_string(), "backend".to_string()],
            chunk_delay: Duration::from_millis(20),
        }
    }
}

/// What the mock backend observed.
#[derive(Default)]
pub struct MockRecord {
    pub hits: AtomicUsize,
    pub bodies: Mutex<Vec<Value>>,
}

#[derive(Clone)]
struct MockState {
    behavior: MockBehavior,
    record: Arc<MockRecord>,
}

/// Start a mock inference backend on an ephemeral port.
///
/// - `/api/generate`: JSON `{"response": "echo: <prompt>"}`
/// - `/api/chat`: NDJSON stream of `{"message": {"content": chunk}}`
/// - `/v1/chat/completions`: SSE stream of OpenAI deltas, then `[DONE]`
/// - `/v1/completions`: always 500
pub async fn start_mock_backend(behavior: MockBehavior) -> (SocketAddr, Arc<MockRecord>) {
    let record = Arc::new(MockRecord::default());
    let state = MockState {
        behavior,
        record: record.clone(),
    };
    let app = Router::new()
        .route("/api/generate", post(generate))
        .route("/api/chat", post(chat_ndjson))
        .route("/v1/chat/completions", post(chat_sse))
        .route("/v1/completions", post(broken))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, record)
}

async fn observe(state: &MockState, body: Value) {
    state.record.hits.fetch_add(1, Ordering::SeqCst);
    state.record.bodies.lock().unwrap().push(body);
    tokio::time::sleep(state.behavior.delay).await;
}

async fn generate(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    observe(&state, body).await;
    Json(json!({ "model": "mock", "response": format!("echo: {}", prompt), "done": true }))
}

fn chunk_stream(state: &MockState, render: fn(&str) -> String) -> Body {
    let delay = state.behavior.chunk_delay;
    let lines: Vec<String> = state.behavior.chunks.iter().map(|c| render(c)).collect();
    let stream = stream::iter(lines).then(move |line| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(line)
    });
    Body::from_stream(stream)
}

async fn chat_ndjson(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    observe(&state, body).await;
    let body = chunk_stream(&state, |c| format!("{}\n", json!({ "message": { "content": c } })));
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

async fn chat_sse(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    observe(&state, body).await;
    let mut chunks = state.behavior.chunks.clone();
    chunks.push(String::new());
    let with_done = MockState {
        behavior: MockBehavior {
            chunks,
            ..state.behavior.clone()
        },
        record: state.record.clone(),
    };
    let body = chunk_stream(&with_done, |c| {
        if c.is_empty() {
            "data: [DONE]\n\n".to_string()
        } else {
            format!("data: {}\n\n", json!({ "choices": [{ "delta": { "content": c } }] }))
        }
    });
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn broken(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    observe(&state, body).await;
    (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response()
}

/// Config pointing at `backend` with one blocking input scanner on "forbidden".
pub fn guard_config(backend: SocketAddr) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.backend.url = format!("http://{}", backend);
    config.backend.request_timeout_secs = 5;
    config.scanners.input = PipelineConfig {
        scanners: vec![scanner("BanSubstrings", json!({ "substrings": ["forbidden"] }))],
        ..PipelineConfig::default()
    };
    config
}

pub fn scanner(kind: &str, options: Value) -> ScannerSpec {
    ScannerSpec {
        kind: kind.to_string(),
        name: None,
        advisory: false,
        options,
    }
}

/// A running guard bound to an ephemeral port.
pub struct Guard {
    pub addr: SocketAddr,
    pub orchestrator: Arc<Orchestrator>,
    shutdown: Shutdown,
}

impl Guard {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Poll until no ticket is held, or give up after `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.orchestrator.admission().active() == 0 && self.orchestrator.admission().queued() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_guard(config: GuardConfig) -> Guard {
    let server = HttpServer::new(config).unwrap();
    let orchestrator = server.orchestrator();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, &server_shutdown).await;
    });

    Guard {
        addr,
        orchestrator,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
