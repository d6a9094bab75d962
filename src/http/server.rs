//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: guarded inference routes and operational endpoints
//! - Wire up middleware (request ID, tracing, panic recovery)
//! - Serve on a listener with the peer address available to handlers
//! - Close admission and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ConfigError, GuardConfig};
use crate::http::ops;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::PanicResponder;
use crate::lifecycle::Shutdown;
use crate::orchestrator::Orchestrator;
use crate::scanner::ScannerRegistry;

/// Backend-compatible inference routes.
pub const GUARDED_ROUTES: [&str; 4] = [
    "/api/generate",
    "/api/chat",
    "/v1/completions",
    "/v1/chat/completions",
];

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<GuardConfig>,
}

/// HTTP server for the guard.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Build every subsystem from a validated configuration.
    pub fn new(config: GuardConfig) -> Result<Self, ConfigError> {
        let orchestrator = Orchestrator::from_config(&config, &ScannerRegistry::builtin())?;
        Ok(Self::with_orchestrator(config, orchestrator))
    }

    pub fn with_orchestrator(config: GuardConfig, orchestrator: Orchestrator) -> Self {
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
        };
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    fn build_router(state: AppState) -> Router {
        let mut router = Router::new();
        for path in GUARDED_ROUTES {
            router = router.route(path, post(guarded_handler));
        }
        let on_panic = PanicResponder::new(state.orchestrator.clone());
        router
            .route("/health", get(ops::health))
            .route("/queue/stats", get(ops::queue_stats))
            .route("/config", get(ops::config))
            .route("/scan", post(ops::scan))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            request_id = %request_id(request.headers()),
                        )
                    }))
                    .layer(propagate_request_id_layer())
                    .layer(CatchPanicLayer::custom(on_panic)),
            )
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.state.orchestrator.clone()
    }

    /// Serve until `shutdown` fires, then stop admitting and drain open
    /// connections.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let shutdown = shutdown.clone();
        let orchestrator = self.state.orchestrator.clone();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("Shutdown requested, closing admission");
                orchestrator.admission().close();
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GuardConfig {
        &self.state.config
    }
}

async fn guarded_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    state.orchestrator.handle(peer, request).await
}
