//! Operational endpoints: health, admission statistics, configuration
//! introspection and diagnostic scanning.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::admission::AdmissionStats;
use crate::http::server::AppState;
use crate::scanner::{PipelineKind, PipelineVerdict};

/// Option keys whose values never leave the process.
const SECRET_KEYS: [&str; 3] = ["api_key", "token", "password"];

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub access_control_enabled: bool,
    pub input_scanners_enabled: bool,
    pub output_scanners_enabled: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let orchestrator = &state.orchestrator;
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        access_control_enabled: orchestrator.access().is_enabled(),
        input_scanners_enabled: orchestrator.scanners().input.is_enabled(),
        output_scanners_enabled: orchestrator.scanners().output.is_enabled(),
    })
}

pub async fn queue_stats(State(state): State<AppState>) -> Json<AdmissionStats> {
    Json(state.orchestrator.admission().stats())
}

/// Effective configuration with secret scanner options masked.
pub async fn config(State(state): State<AppState>) -> Response {
    match serde_json::to_value(state.config.as_ref()) {
        Ok(mut value) => {
            mask_secrets(&mut value);
            Json(value).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize configuration");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn mask_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) && v.is_string() {
                    *v = Value::String("********".to_string());
                } else {
                    mask_secrets(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_secrets),
        _ => {}
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub text: String,
    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineKind,
}

fn default_pipeline() -> PipelineKind {
    PipelineKind::Input
}

pub async fn scan(State(state): State<AppState>, Json(request): Json<ScanRequest>) -> Json<PipelineVerdict> {
    let verdict = state.orchestrator.scan(&request.text, request.pipeline).await;
    tracing::debug!(
        pipeline = %request.pipeline,
        passed = verdict.passed,
        "Diagnostic scan"
    );
    Json(verdict)
}
