//! Output-scanned relay of backend responses.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use futures_util::{stream, Stream, StreamExt};

use crate::admission::AdmissionTicket;
use crate::config::{AbortMode, RelayConfig};
use crate::observability::metrics;
use crate::relay::backend::{content_coding, strip_hop_by_hop, Backend, BackendRequest, BodyStream};
use crate::relay::segment::{Framing, LineSplitter, StreamSegment};
use crate::relay::UpstreamError;
use crate::scanner::{PipelineVerdict, ScannerPipeline};

/// What happened to a segment on its way to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentAction {
    /// Scanned (or nothing to scan) and sent unchanged.
    Forwarded,
    /// Scanned and sent with sanitized text.
    Redacted,
    /// Error response from the backend, never scanned.
    Passthrough,
}

impl SegmentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentAction::Forwarded => "forwarded",
            SegmentAction::Redacted => "redacted",
            SegmentAction::Passthrough => "passthrough",
        }
    }
}

/// One item of a relayed response.
#[derive(Debug)]
pub enum RelayEvent {
    Segment {
        index: u64,
        bytes: Bytes,
        action: SegmentAction,
    },
    /// Output scanning failed; nothing follows.
    Aborted(PipelineVerdict),
    /// The backend failed after the response started; nothing follows.
    UpstreamFailed(UpstreamError),
}

pub type EventStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

/// Failures decided before any byte reaches the client.
#[derive(Debug)]
pub enum RelayError {
    Upstream(UpstreamError),
    /// Output scanning failed on a buffered response.
    Blocked(PipelineVerdict),
}

/// A response ready to stream to the client.
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub framing: Framing,
    pub events: EventStream,
}

impl std::fmt::Debug for RelayResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayResponse")
            .field("status", &self.status)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

/// Forwards one request per ticket and scans what comes back.
#[derive(Clone)]
pub struct StreamingRelay {
    backend: Arc<dyn Backend>,
    output: Arc<ScannerPipeline>,
    config: RelayConfig,
    idle_timeout: Duration,
}

impl StreamingRelay {
    pub fn new(
        backend: Arc<dyn Backend>,
        output: Arc<ScannerPipeline>,
        config: RelayConfig,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            output,
            config,
            idle_timeout,
        }
    }

    pub fn abort_mode(&self) -> AbortMode {
        self.config.abort_mode
    }

    /// Issue the backend call under `ticket`.
    ///
    /// The ticket is released before any error is returned. On success it
    /// moves into the returned stream and is released once the backend side
    /// is finished, or when the stream is dropped.
    pub async fn relay(
        &self,
        request: BackendRequest,
        ticket: AdmissionTicket,
    ) -> Result<RelayResponse, RelayError> {
        let request_id = request.request_id.clone();
        let response = match self.backend.send(request).await {
            Ok(response) => response,
            Err(e) => {
                ticket.release();
                return Err(RelayError::Upstream(e));
            }
        };

        let status = response.status;
        if status.is_server_error() {
            ticket.release();
            return Err(RelayError::Upstream(UpstreamError::Status(status)));
        }

        if status.is_success() {
            if let Some(coding) = content_coding(&response.headers) {
                ticket.release();
                return Err(RelayError::Upstream(UpstreamError::UnsupportedEncoding(coding)));
            }
        }

        let mut headers = response.headers;
        strip_hop_by_hop(&mut headers);
        let framing = Framing::from_headers(&headers);
        let mut body = response.body;

        if !status.is_success() {
            let bytes = read_bounded(&mut body, self.config.max_buffered_bytes, self.idle_timeout)
                .await
                .map_err(RelayError::Upstream)?;
            ticket.release();
            tracing::debug!(request_id = %request_id, status = %status, "Passing backend error through");
            metrics::record_segment(SegmentAction::Passthrough.as_str());
            let event = RelayEvent::Segment {
                index: 0,
                bytes: Bytes::from(bytes),
                action: SegmentAction::Passthrough,
            };
            return Ok(RelayResponse {
                status,
                headers,
                framing,
                events: Box::pin(stream::iter([event])),
            });
        }

        let mut guard = OutputGuard::new(self.output.clone(), self.config.max_buffered_bytes);
        let events: EventStream = match (framing.is_streaming(), self.config.abort_mode) {
            (false, _) => {
                let bytes = read_bounded(&mut body, self.config.max_buffered_bytes, self.idle_timeout)
                    .await
                    .map_err(RelayError::Upstream)?;
                ticket.release();
                let segment = StreamSegment::parse(0, Bytes::from(bytes), framing);
                let event = guard.inspect(segment).await?;
                Box::pin(stream::iter([event]))
            }
            (true, AbortMode::Hard) => {
                let events = self.buffer_stream(body, framing, guard).await?;
                ticket.release();
                Box::pin(stream::iter(events))
            }
            (true, AbortMode::Soft) => Box::pin(soft_stream(SoftState {
                body,
                splitter: LineSplitter::new(self.config.max_segment_bytes),
                pending: VecDeque::new(),
                guard,
                ticket: Some(ticket),
                framing,
                next_index: 0,
                idle: self.idle_timeout,
                eof: false,
                done: false,
            })),
        };

        Ok(RelayResponse {
            status,
            headers,
            framing,
            events,
        })
    }

    /// Consume the whole stream, scanning as it arrives; any failure
    /// replaces the entire response.
    async fn buffer_stream(
        &self,
        mut body: BodyStream,
        framing: Framing,
        mut guard: OutputGuard,
    ) -> Result<Vec<RelayEvent>, RelayError> {
        let mut splitter = LineSplitter::new(self.config.max_segment_bytes);
        let mut events = Vec::new();
        let mut buffered = 0usize;
        let mut index = 0u64;

        loop {
            let (lines, eof) = match next_chunk(&mut body, self.idle_timeout).await {
                Ok(Some(chunk)) => {
                    buffered += chunk.len();
                    if buffered > self.config.max_buffered_bytes {
                        return Err(RelayError::Upstream(UpstreamError::BodyTooLarge(
                            self.config.max_buffered_bytes,
                        )));
                    }
                    (splitter.push(&chunk), false)
                }
                Ok(None) => (splitter.finish().into_iter().collect(), true),
                Err(e) => return Err(RelayError::Upstream(e)),
            };

            for raw in lines {
                let segment = StreamSegment::parse(index, raw, framing);
                index += 1;
                events.push(guard.inspect(segment).await?);
            }
            if eof {
                return Ok(events);
            }
        }
    }
}

/// Accumulated-text scanning shared by every relay mode.
struct OutputGuard {
    pipeline: Arc<ScannerPipeline>,
    /// Text produced by the backend so far.
    accumulated: String,
    /// Text the client has been sent so far.
    emitted: String,
    /// Bound on `accumulated`, in bytes.
    limit: usize,
}

impl OutputGuard {
    fn new(pipeline: Arc<ScannerPipeline>, limit: usize) -> Self {
        Self {
            pipeline,
            accumulated: String::new(),
            emitted: String::new(),
            limit,
        }
    }

    async fn inspect(&mut self, segment: StreamSegment) -> Result<RelayEvent, RelayError> {
        let index = segment.index;
        let text = match segment.text() {
            Some(text) if self.pipeline.is_enabled() => text.to_string(),
            _ => return Ok(forwarded(index, segment.into_bytes())),
        };

        if self.accumulated.len() + text.len() > self.limit {
            return Err(RelayError::Upstream(UpstreamError::BodyTooLarge(self.limit)));
        }
        self.accumulated.push_str(&text);
        let verdict = self.pipeline.evaluate(&self.accumulated).await;
        if !verdict.passed {
            metrics::record_segment("aborted");
            return Err(RelayError::Blocked(verdict));
        }

        let extends = verdict
            .sanitized
            .as_deref()
            .map(|sanitized| sanitized.starts_with(self.emitted.as_str()));
        match extends {
            Some(true) => {
                let sanitized = verdict.sanitized.unwrap_or_default();
                let suffix = sanitized[self.emitted.len()..].to_string();
                self.emitted = sanitized;
                if suffix == text {
                    return Ok(forwarded(index, segment.into_bytes()));
                }
                metrics::record_segment(SegmentAction::Redacted.as_str());
                Ok(RelayEvent::Segment {
                    index,
                    bytes: segment.with_text(&suffix),
                    action: SegmentAction::Redacted,
                })
            }
            Some(false) => {
                // the match began in text that is already on the wire
                tracing::debug!(segment = index, "Redaction reaches into emitted text");
                metrics::record_segment("aborted");
                Err(RelayError::Blocked(unextendable(verdict)))
            }
            None => {
                self.emitted.push_str(&text);
                Ok(forwarded(index, segment.into_bytes()))
            }
        }
    }
}

/// Fails every sanitizer of a passing verdict whose rewrite cannot be
/// expressed as a suffix of the emitted text.
fn unextendable(mut verdict: PipelineVerdict) -> PipelineVerdict {
    for v in verdict.verdicts.iter_mut().filter(|v| v.sanitized.is_some()) {
        v.passed = false;
        v.advisory = false;
        v.reason = Some("match spans text already sent".to_string());
    }
    verdict.passed = false;
    verdict.sanitized = None;
    verdict
}

fn forwarded(index: u64, bytes: Bytes) -> RelayEvent {
    metrics::record_segment(SegmentAction::Forwarded.as_str());
    RelayEvent::Segment {
        index,
        bytes,
        action: SegmentAction::Forwarded,
    }
}

struct SoftState {
    body: BodyStream,
    splitter: LineSplitter,
    pending: VecDeque<Bytes>,
    guard: OutputGuard,
    ticket: Option<AdmissionTicket>,
    framing: Framing,
    next_index: u64,
    idle: Duration,
    eof: bool,
    done: bool,
}

impl SoftState {
    fn finish(&mut self) {
        self.done = true;
        if let Some(ticket) = self.ticket.take() {
            ticket.release();
        }
    }
}

/// Segments are scanned one at a time, in order; the next backend chunk is
/// only read once the pending segments are consumed.
fn soft_stream(state: SoftState) -> impl Stream<Item = RelayEvent> + Send {
    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            if let Some(raw) = state.pending.pop_front() {
                let segment = StreamSegment::parse(state.next_index, raw, state.framing);
                state.next_index += 1;
                return match state.guard.inspect(segment).await {
                    Ok(event) => Some((event, state)),
                    Err(RelayError::Blocked(verdict)) => {
                        state.finish();
                        Some((RelayEvent::Aborted(verdict), state))
                    }
                    Err(RelayError::Upstream(e)) => {
                        state.finish();
                        Some((RelayEvent::UpstreamFailed(e), state))
                    }
                };
            }

            if state.eof {
                state.finish();
                return None;
            }

            match next_chunk(&mut state.body, state.idle).await {
                Ok(Some(chunk)) => {
                    let lines = state.splitter.push(&chunk);
                    state.pending.extend(lines);
                }
                Ok(None) => {
                    state.eof = true;
                    if let Some(rest) = state.splitter.finish() {
                        state.pending.push_back(rest);
                    }
                }
                Err(e) => {
                    state.finish();
                    return Some((RelayEvent::UpstreamFailed(e), state));
                }
            }
        }
    })
}

/// Next body chunk, bounded by the idle timeout. `Ok(None)` at the end.
async fn next_chunk(body: &mut BodyStream, idle: Duration) -> Result<Option<Bytes>, UpstreamError> {
    match tokio::time::timeout(idle, body.next()).await {
        Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Ok(None),
        Err(_) => Err(UpstreamError::Timeout),
    }
}

async fn read_bounded(body: &mut BodyStream, limit: usize, idle: Duration) -> Result<Vec<u8>, UpstreamError> {
    let mut out = Vec::new();
    while let Some(chunk) = next_chunk(body, idle).await? {
        if out.len() + chunk.len() > limit {
            return Err(UpstreamError::BodyTooLarge(limit));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionController;
    use crate::config::FailMode;
    use crate::relay::BackendResponse;
    use crate::scanner::builtin::BanSubstrings;
    use crate::scanner::pipeline::{PipelineEntry, PipelineKind};
    use async_trait::async_trait;
    use axum::http::{header, HeaderValue, Method};
    use tokio::time::Instant;

    struct Canned {
        status: StatusCode,
        content_type: &'static str,
        chunks: Vec<Result<Bytes, UpstreamError>>,
    }

    #[async_trait]
    impl Backend for Canned {
        async fn send(&self, _request: BackendRequest) -> Result<BackendResponse, UpstreamError> {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
            Ok(BackendResponse {
                status: self.status,
                headers,
                body: Box::pin(stream::iter(self.chunks.clone())),
            })
        }
    }

    struct Gzipped;

    #[async_trait]
    impl Backend for Gzipped {
        async fn send(&self, _request: BackendRequest) -> Result<BackendResponse, UpstreamError> {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            let body: Vec<Result<Bytes, UpstreamError>> =
                vec![Ok(Bytes::from_static(&[0x1f, 0x8b, 0x08, 0x00, 0x73, 0x65, 0x63]))];
            Ok(BackendResponse {
                status: StatusCode::OK,
                headers,
                body: Box::pin(stream::iter(body)),
            })
        }
    }

    fn ndjson(parts: &[&str]) -> Vec<Result<Bytes, UpstreamError>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::from(format!("{}\n", serde_json::json!({ "response": p })))))
            .collect()
    }

    fn output(redact: bool) -> Arc<ScannerPipeline> {
        let scanner = BanSubstrings::new(vec!["secret".to_string()], false, redact).unwrap();
        Arc::new(ScannerPipeline::new(
            PipelineKind::Output,
            vec![PipelineEntry {
                name: "BanSubstrings".to_string(),
                advisory: false,
                scanner: Arc::new(scanner),
            }],
            FailMode::FailFast,
            false,
            Duration::from_secs(1),
        ))
    }

    fn relay(backend: Canned, mode: AbortMode, redact: bool) -> StreamingRelay {
        let config = RelayConfig {
            abort_mode: mode,
            ..RelayConfig::default()
        };
        StreamingRelay::new(Arc::new(backend), output(redact), config, Duration::from_secs(1))
    }

    fn request() -> BackendRequest {
        BackendRequest {
            method: Method::POST,
            path_and_query: "/api/generate".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{}"),
            request_id: "test".to_string(),
        }
    }

    async fn ticket(ac: &AdmissionController) -> AdmissionTicket {
        ac.acquire(Instant::now() + Duration::from_secs(1)).await.unwrap()
    }

    async fn collect(response: RelayResponse) -> Vec<RelayEvent> {
        response.events.collect().await
    }

    #[tokio::test]
    async fn test_soft_abort_keeps_forwarded_prefix() {
        let ac = AdmissionController::new(1, None);
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "application/x-ndjson",
            chunks: ndjson(&["Hello ", "the secret", " is out"]),
        };
        let response = relay(backend, AbortMode::Soft, false)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap();
        assert_eq!(ac.active(), 1);

        let events = collect(response).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RelayEvent::Segment { action: SegmentAction::Forwarded, .. }));
        match &events[1] {
            RelayEvent::Aborted(verdict) => assert_eq!(verdict.failed_scanners(), vec!["BanSubstrings"]),
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_hard_abort_replaces_everything() {
        let ac = AdmissionController::new(1, None);
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "application/x-ndjson",
            chunks: ndjson(&["Hello ", "the secret"]),
        };
        let err = relay(backend, AbortMode::Hard, false)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Blocked(_)));
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_redaction_rewrites_segment_text() {
        let ac = AdmissionController::new(1, None);
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "application/x-ndjson",
            chunks: ndjson(&["my ", "secret", " is safe"]),
        };
        let response = relay(backend, AbortMode::Soft, true)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap();

        let mut text = String::new();
        for event in collect(response).await {
            let RelayEvent::Segment { bytes, .. } = event else {
                panic!("unexpected event");
            };
            let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            text.push_str(value["response"].as_str().unwrap());
        }
        assert_eq!(text, "my [REDACTED] is safe");
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_redaction_split_across_segments_never_leaks() {
        let ac = AdmissionController::new(1, None);
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "application/x-ndjson",
            chunks: ndjson(&["my ", "sec", "ret", " is out"]),
        };
        let response = relay(backend, AbortMode::Soft, true)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap();

        let mut sent = String::new();
        let mut aborted = None;
        for event in collect(response).await {
            match event {
                RelayEvent::Segment { bytes, .. } => {
                    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                    sent.push_str(value["response"].as_str().unwrap());
                }
                RelayEvent::Aborted(verdict) => aborted = Some(verdict),
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert_eq!(sent, "my sec");
        let verdict = aborted.expect("stream should end with an abort");
        assert!(!verdict.passed);
        assert_eq!(verdict.failed_scanners(), vec!["BanSubstrings"]);
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_accumulated_text_is_bounded() {
        let ac = AdmissionController::new(1, None);
        let parts: Vec<String> = (0..20).map(|_| "x".repeat(100)).collect();
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "application/x-ndjson",
            chunks: ndjson(&parts),
        };
        let config = RelayConfig {
            abort_mode: AbortMode::Soft,
            max_buffered_bytes: 1000,
            ..RelayConfig::default()
        };
        let relay = StreamingRelay::new(Arc::new(backend), output(false), config, Duration::from_secs(1));
        let response = relay.relay(request(), ticket(&ac).await).await.unwrap();

        let events = collect(response).await;
        assert_eq!(events.len(), 11);
        assert!(matches!(
            events.last(),
            Some(RelayEvent::UpstreamFailed(UpstreamError::BodyTooLarge(1000)))
        ));
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_single_body_blocked_before_sending() {
        let ac = AdmissionController::new(1, None);
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "application/json",
            chunks: vec![
                Ok(Bytes::from_static(b"{\"response\":\"the sec")),
                Ok(Bytes::from_static(b"ret\",\"done\":true}")),
            ],
        };
        let err = relay(backend, AbortMode::Soft, false)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Blocked(_)));
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_compressed_response_is_refused() {
        let ac = AdmissionController::new(1, None);
        let relay = StreamingRelay::new(
            Arc::new(Gzipped),
            output(false),
            RelayConfig::default(),
            Duration::from_secs(1),
        );
        let err = relay.relay(request(), ticket(&ac).await).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Upstream(UpstreamError::UnsupportedEncoding(ref coding)) if coding == "gzip"
        ));
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_backend_errors() {
        let ac = AdmissionController::new(1, None);
        let failing = Canned {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            content_type: "application/json",
            chunks: vec![],
        };
        let err = relay(failing, AbortMode::Soft, false)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Upstream(UpstreamError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        ));
        assert_eq!(ac.active(), 0);

        let not_found = Canned {
            status: StatusCode::NOT_FOUND,
            content_type: "application/json",
            chunks: vec![Ok(Bytes::from_static(b"{\"error\":\"model not found\"}"))],
        };
        let response = relay(not_found, AbortMode::Soft, false)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(ac.active(), 0);
        let events = collect(response).await;
        assert!(matches!(events[0], RelayEvent::Segment { action: SegmentAction::Passthrough, .. }));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_releases_ticket() {
        let ac = AdmissionController::new(1, None);
        let mut chunks = ndjson(&["partial"]);
        chunks.push(Err(UpstreamError::Stream("connection reset".to_string())));
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "application/x-ndjson",
            chunks,
        };
        let response = relay(backend, AbortMode::Soft, false)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap();
        let events = collect(response).await;
        assert!(matches!(events.last(), Some(RelayEvent::UpstreamFailed(UpstreamError::Stream(_)))));
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_ticket() {
        let ac = AdmissionController::new(1, None);
        let backend = Canned {
            status: StatusCode::OK,
            content_type: "text/event-stream",
            chunks: vec![Ok(Bytes::from_static(b"data: {\"content\":\"hi\"}\n\n"))],
        };
        let mut response = relay(backend, AbortMode::Soft, false)
            .relay(request(), ticket(&ac).await)
            .await
            .unwrap();
        assert!(response.events.next().await.is_some());
        assert_eq!(ac.active(), 1);
        drop(response);
        assert_eq!(ac.active(), 0);
    }
}
