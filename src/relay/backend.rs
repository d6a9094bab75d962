//! Outbound call to the inference backend.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use futures_util::{Stream, StreamExt};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::BackendConfig;
use crate::http::request::X_REQUEST_ID;
use crate::relay::UpstreamError;

/// Response body as it arrives from the backend.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// One inference call.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    /// Path and query as received from the client.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub request_id: String,
}

pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The inference service behind the guard.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Issue the call and return once response headers are available.
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, UpstreamError>;
}

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "host",
    "content-length",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "keep-alive",
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Client headers as sent to the backend.
///
/// The backend is asked for an uncompressed body; output scanners read the
/// response as text.
pub fn outbound_headers(mut headers: HeaderMap, request_id: &str) -> HeaderMap {
    strip_hop_by_hop(&mut headers);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    if let Ok(id) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, id);
    }
    headers
}

/// Content coding of a response body, `None` when it is plain.
pub fn content_coding(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_ENCODING)?;
    let coding = value.to_str().unwrap_or("invalid").trim().to_ascii_lowercase();
    if coding.is_empty() || coding == "identity" {
        None
    } else {
        Some(coding)
    }
}

/// Plain-HTTP backend over a pooled hyper client.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client<HttpConnector, Body>,
    base: url::Url,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, UpstreamError> {
        let base = url::Url::parse(&config.url)
            .map_err(|e| UpstreamError::InvalidRequest(format!("backend url: {}", e)))?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            base,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn target(&self, path_and_query: &str) -> Result<Uri, UpstreamError> {
        let base = self.base.as_str().trim_end_matches('/');
        format!("{}{}", base, path_and_query)
            .parse::<Uri>()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, UpstreamError> {
        let uri = self.target(&request.path_and_query)?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = outbound_headers(request.headers, &request.request_id);
        }
        let outbound = builder
            .body(Body::from(request.body))
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;

        let response = match tokio::time::timeout(self.request_timeout, self.client.request(outbound)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_connect() => return Err(UpstreamError::Connect(e.to_string())),
            Ok(Err(e)) => return Err(UpstreamError::Stream(e.to_string())),
            Err(_) => return Err(UpstreamError::Timeout),
        };

        let (parts, incoming) = response.into_parts();
        let body = Body::new(incoming)
            .into_data_stream()
            .map(|chunk| chunk.map_err(|e| UpstreamError::Stream(e.to_string())));

        Ok(BackendResponse {
            status: parts.status,
            headers: parts.headers,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            url: url.to_string(),
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
            stream_idle_timeout_secs: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_target_joins_base_and_path() {
        let b = backend("http://127.0.0.1:11434/");
        assert_eq!(
            b.target("/api/generate?x=1").unwrap().to_string(),
            "http://127.0.0.1:11434/api/generate?x=1"
        );

        let b = backend("http://10.0.0.2:8000/inference");
        assert_eq!(
            b.target("/v1/chat/completions").unwrap().to_string(),
            "http://10.0.0.2:8000/inference/v1/chat/completions"
        );
    }

    #[test]
    fn test_hop_by_hop_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("guard"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::AUTHORIZATION));
    }

    #[test]
    fn test_outbound_headers_ask_for_plain_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));

        let out = outbound_headers(headers, "req-7");
        assert_eq!(out[header::ACCEPT_ENCODING], "identity");
        assert_eq!(out[header::CONTENT_TYPE], "application/json");
        assert_eq!(out[X_REQUEST_ID], "req-7");
        assert_eq!(out[header::AUTHORIZATION], "Bearer t");
        assert!(!out.contains_key(header::CONTENT_LENGTH));
    }

    #[test]
    fn test_content_coding() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_coding(&headers), None);
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("Identity"));
        assert_eq!(content_coding(&headers), None);
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert_eq!(content_coding(&headers).as_deref(), Some("gzip"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let b = backend(&format!("http://{}", addr));
        let err = b
            .send(BackendRequest {
                method: Method::POST,
                path_and_query: "/api/generate".to_string(),
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"{}"),
                request_id: "test".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Connect(_)));
    }
}
