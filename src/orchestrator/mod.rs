//! Per-request lifecycle.
//!
//! # Data Flow
//! ```text
//! client request
//!     → access check (peer address, before the body is read)
//!     → body read + prompt extraction (context.rs)
//!     → locale classification
//!     → input pipeline
//!     → admission ticket (queue with deadline)
//!     → relay (backend call, output pipeline per segment)
//!     → response, or ErrorRecord (error.rs) on any terminal failure
//! ```
//!
//! # Design Decisions
//! - The orchestrator is the only producer of client-visible errors
//! - Every path that acquired a ticket gives it up: through the relay on
//!   completion, or by drop on error and client disconnect
//! - State transitions are tracked by `Lifecycle` (state.rs)

pub mod context;
pub mod error;
pub mod state;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use futures_util::{stream, StreamExt};
use tokio::time::Instant;

use crate::admission::AdmissionController;
use crate::config::validation::ValidationError;
use crate::config::{ConfigError, FailMode, GuardConfig};
use crate::http::request::request_id;
use crate::locale::{LanguageClassifier, Locale, MessageCatalog};
use crate::relay::{
    Backend, BackendRequest, EventStream, Framing, HttpBackend, RelayError, RelayEvent,
    RelayResponse, SegmentAction, StreamingRelay,
};
use crate::scanner::{PipelineKind, PipelineVerdict, ScannerRegistry, ScannerSet};
use crate::security::access_control::{client_ip, AccessController, AccessDecision};

pub use context::{PromptPayload, RequestContext};
pub use error::{ErrorCode, ErrorDetails, ErrorRecord, GuardError};
pub use state::{Lifecycle, RequestState};

/// Turns errors into localized records.
#[derive(Debug)]
struct Reporter {
    catalog: MessageCatalog,
    retry_after_secs: u64,
}

impl Reporter {
    fn record(&self, error: &GuardError, locale: Locale) -> ErrorRecord {
        let scanners = error
            .verdict()
            .map(PipelineVerdict::failed_scanners)
            .unwrap_or_default();
        let message = self.catalog.render(locale, error.code(), &scanners);
        ErrorRecord::new(error, message, locale, self.retry_after_secs)
    }

    fn log(&self, request_id: &str, error: &GuardError, locale: Locale) {
        match error {
            GuardError::Internal(_) => {
                tracing::error!(request_id = %request_id, locale = %locale, error = %error, "Request failed")
            }
            GuardError::Upstream(_) | GuardError::ScannerUnavailable(_) => {
                tracing::warn!(request_id = %request_id, locale = %locale, error = %error, "Request failed")
            }
            _ => tracing::info!(
                request_id = %request_id,
                locale = %locale,
                code = %error.code(),
                error = %error,
                "Request rejected"
            ),
        }
    }
}

/// Composes access control, scanning, admission and relay.
pub struct Orchestrator {
    access: AccessController,
    trust_forwarded_for: bool,
    classifier: LanguageClassifier,
    scanners: Arc<ScannerSet>,
    admission: Arc<AdmissionController>,
    relay: StreamingRelay,
    reporter: Arc<Reporter>,
    max_body_size: usize,
    queue_timeout: Duration,
}

impl Orchestrator {
    /// Build with the plain-HTTP backend from `config.backend`.
    pub fn from_config(config: &GuardConfig, registry: &ScannerRegistry) -> Result<Self, ConfigError> {
        let backend =
            HttpBackend::new(&config.backend).map_err(|e| ConfigError::Backend(e.to_string()))?;
        Self::with_backend(config, registry, Arc::new(backend))
    }

    pub fn with_backend(
        config: &GuardConfig,
        registry: &ScannerRegistry,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, ConfigError> {
        let access = AccessController::from_config(&config.access)
            .map_err(|e| ConfigError::Validation(vec![ValidationError::new("access", e.to_string())]))?;
        let default_locale = Locale::from_tag(&config.locale.default).unwrap_or(Locale::En);
        let scanners = Arc::new(registry.build_set(&config.scanners)?);
        let relay = StreamingRelay::new(
            backend,
            Arc::new(scanners.output.clone()),
            config.relay.clone(),
            Duration::from_secs(config.backend.stream_idle_timeout_secs),
        );

        Ok(Self {
            access,
            trust_forwarded_for: config.access.trust_forwarded_for,
            classifier: LanguageClassifier::new(default_locale, config.locale.min_signal_chars),
            scanners,
            admission: Arc::new(AdmissionController::from_config(&config.admission)),
            relay,
            reporter: Arc::new(Reporter {
                catalog: MessageCatalog::from_config(&config.locale),
                retry_after_secs: config.admission.retry_after_secs,
            }),
            max_body_size: config.listener.max_body_size,
            queue_timeout: Duration::from_millis(config.admission.queue_timeout_ms),
        })
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn scanners(&self) -> &ScannerSet {
        &self.scanners
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Diagnostic scan: every scanner runs regardless of the configured mode.
    pub async fn scan(&self, text: &str, kind: PipelineKind) -> PipelineVerdict {
        self.scanners
            .pipeline(kind)
            .evaluate_with(text, FailMode::FailComplete)
            .await
    }

    /// Guard one inference request end to end.
    pub async fn handle(&self, peer: SocketAddr, request: Request<Body>) -> Response {
        let arrived_at = Instant::now();
        let request_id = request_id(request.headers());
        let mut life = Lifecycle::new(request_id.clone());
        let default_locale = self.classifier.default_locale();

        let client = client_ip(peer.ip(), request.headers(), self.trust_forwarded_for);
        if let AccessDecision::Deny { reason } = self.access.evaluate(client) {
            return self.fail(&mut life, GuardError::AccessDenied { reason }, default_locale);
        }
        life.advance(RequestState::AccessChecked);

        let (parts, body) = request.into_parts();
        let mut payload = match context::read_body(body, self.max_body_size)
            .await
            .and_then(|bytes| PromptPayload::parse(&bytes))
        {
            Ok(payload) => payload,
            Err(e) => return self.fail(&mut life, e, default_locale),
        };

        let locale = self.classifier.classify(&payload.prompt);
        life.advance(RequestState::LanguageClassified);
        let ctx = RequestContext::new(
            request_id.clone(),
            client,
            payload.prompt.clone(),
            locale,
            arrived_at,
            self.queue_timeout,
        );
        tracing::debug!(
            request_id = %ctx.request_id,
            client = %ctx.client,
            locale = %ctx.locale,
            model = payload.model.as_deref().unwrap_or("-"),
            stream = payload.stream.unwrap_or(false),
            "Request received"
        );

        let verdict = self.scanners.input.evaluate(&ctx.prompt).await;
        if !verdict.passed {
            let error = GuardError::from_verdict(verdict, GuardError::PromptBlocked);
            return self.fail(&mut life, error, ctx.locale);
        }
        if let Some(sanitized) = verdict.sanitized.as_deref() {
            if !payload.apply_sanitized(sanitized) {
                tracing::info!(
                    request_id = %ctx.request_id,
                    "Sanitized prompt spans several messages; forwarding original"
                );
            }
        }
        life.advance(RequestState::InputScanned);

        let ticket = match self.admission.acquire(ctx.deadline).await {
            Ok(ticket) => ticket,
            Err(e) => return self.fail(&mut life, GuardError::Admission(e), ctx.locale),
        };
        life.advance(RequestState::Admitted);

        let backend_request = BackendRequest {
            method: Method::POST,
            path_and_query: parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string()),
            headers: parts.headers,
            body: payload.to_bytes(),
            request_id: ctx.request_id.clone(),
        };
        life.advance(RequestState::Relaying);

        match self.relay.relay(backend_request, ticket).await {
            Ok(relayed) => self.respond(relayed, life, ctx.locale),
            Err(RelayError::Upstream(e)) => self.fail(&mut life, GuardError::Upstream(e), ctx.locale),
            Err(RelayError::Blocked(verdict)) => {
                let error = GuardError::from_verdict(verdict, GuardError::ResponseBlocked);
                self.fail(&mut life, error, ctx.locale)
            }
        }
    }

    /// Record for a failure outside the request flow, in the default locale.
    pub fn internal_error(&self, detail: &str) -> Response {
        let error = GuardError::Internal(detail.to_string());
        let locale = self.classifier.default_locale();
        self.reporter.log("-", &error, locale);
        self.reporter.record(&error, locale).into_response()
    }

    fn fail(&self, life: &mut Lifecycle, error: GuardError, locale: Locale) -> Response {
        self.reporter.log(life.request_id(), &error, locale);
        life.advance(error.terminal_state());
        self.reporter.record(&error, locale).into_response()
    }

    /// Stream the relayed response, ending the lifecycle with the stream.
    fn respond(&self, relayed: RelayResponse, life: Lifecycle, locale: Locale) -> Response {
        let RelayResponse {
            status,
            headers,
            framing,
            events,
        } = relayed;

        let body = OutgoingBody {
            events,
            life,
            reporter: self.reporter.clone(),
            locale,
            framing,
        }
        .into_stream();

        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// State of a response body on its way to the client.
struct OutgoingBody {
    events: EventStream,
    life: Lifecycle,
    reporter: Arc<Reporter>,
    locale: Locale,
    framing: Framing,
}

impl OutgoingBody {
    fn terminal(&mut self, error: GuardError) -> Bytes {
        self.reporter.log(self.life.request_id(), &error, self.locale);
        self.life.advance(error.terminal_state());
        let record = self.reporter.record(&error, self.locale);
        self.framing.terminal_record(&record.to_json())
    }

    fn into_stream(self) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut body = state?;
            match body.events.next().await {
                Some(RelayEvent::Segment { bytes, action, .. }) => {
                    if action != SegmentAction::Passthrough {
                        body.life.advance(RequestState::OutputScanned);
                    }
                    Some((Ok(bytes), Some(body)))
                }
                Some(RelayEvent::Aborted(verdict)) => {
                    let error = GuardError::from_verdict(verdict, GuardError::ResponseBlocked);
                    let bytes = body.terminal(error);
                    Some((Ok(bytes), None))
                }
                Some(RelayEvent::UpstreamFailed(e)) => {
                    let bytes = body.terminal(GuardError::Upstream(e));
                    Some((Ok(bytes), None))
                }
                None => {
                    body.life.advance(RequestState::Completed);
                    tracing::debug!(
                        request_id = %body.life.request_id(),
                        segments = body.life.segments(),
                        "Request completed"
                    );
                    None
                }
            }
        })
    }
}
