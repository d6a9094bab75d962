//! Scanner backed by an external classification service.
//!
//! Request: `POST <url>` with `{"text": "..."}`.
//! Response: `{"passed": bool, "reason": string?, "sanitized": string?}`.
//! Transport failures and non-2xx statuses are execution errors, never a
//! content verdict.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scanner::registry::parse_options;
use crate::scanner::{ScanOutcome, Scanner, ScannerError};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoteOptions {
    url: String,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct RemoteResponse {
    passed: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    sanitized: Option<String>,
}

pub struct RemoteScanner {
    client: reqwest::Client,
    url: reqwest::Url,
    api_key: Option<String>,
}

impl RemoteScanner {
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, String> {
        let url = reqwest::Url::parse(url).map_err(|e| format!("invalid url {:?}: {}", url, e))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }

    pub fn from_options(options: &serde_json::Value) -> Result<Self, String> {
        let o: RemoteOptions = parse_options(options)?;
        Self::new(&o.url, o.api_key)
    }
}

#[async_trait]
impl Scanner for RemoteScanner {
    async fn check(&self, text: &str) -> Result<ScanOutcome, ScannerError> {
        let mut request = self.client.post(self.url.clone()).json(&RemoteRequest { text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScannerError::Remote(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScannerError::Remote(format!("classifier returned {}", status)));
        }
        let body: RemoteResponse = response
            .json()
            .await
            .map_err(|e| ScannerError::Remote(format!("invalid classifier response: {}", e)))?;

        Ok(ScanOutcome {
            passed: body.passed,
            reason: body.reason,
            sanitized: body.sanitized.filter(|_| body.passed),
        })
    }
}
