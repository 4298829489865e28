//! Shared HTTP plumbing for AI providers.
//!
//! Every provider call goes through [`send_json`], which turns transport
//! failures, non-2xx statuses, and unparseable bodies into
//! [`KbError::Provider`]. For error statuses the provider's own
//! `error.message` is used when present, otherwise the raw body.

use std::time::Duration;

use crate::error::{KbError, KbResult};

/// Build a client with the configured per-request timeout. No retries are
/// performed at this layer.
pub fn http_client(provider: &str, timeout_secs: u64) -> KbResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| client_setup_error(provider, e))
}

fn client_setup_error(provider: &str, err: impl std::fmt::Display) -> KbError {
    KbError::provider(provider, format!("HTTP client could not be created: {}", err))
}

/// Send a prepared JSON request and return the parsed response body.
pub async fn send_json(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> KbResult<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| KbError::provider(provider, transport_message(e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| KbError::provider(provider, transport_message(e)))?;

    if !status.is_success() {
        tracing::warn!(provider, status = status.as_u16(), "provider request failed");
        return Err(KbError::provider(provider, error_reason(&body)));
    }

    serde_json::from_str(&body)
        .map_err(|e| KbError::provider(provider, format!("invalid JSON response: {}", e)))
}

/// Provider-supplied error message, or the raw body.
pub fn error_reason(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Transport errors without the request URL.
fn transport_message(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else {
        e.without_url().to_string()
    }
}

/// Read an integer usage field from a JSON pointer.
pub fn usage_i64(raw: &serde_json::Value, pointer: &str) -> Option<i64> {
    raw.pointer(pointer).and_then(|v| v.as_i64())
}

/// Parse a JSON array of numbers into an f32 vector.
pub fn parse_vector(value: Option<&serde_json::Value>) -> Option<Vec<f32>> {
    value.and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .map(|x| x.as_f64().unwrap_or(0.0) as f32)
            .collect()
    })
}
