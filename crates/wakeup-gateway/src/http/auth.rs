//! Request authentication for provider callbacks and the job API.

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::warn;
use wakeup_core::config::{WebhookAuthMode, WebhooksConfig};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-wakeup-signature";

/// Authenticate a provider callback (delivery status or voice) per the
/// configured mode.
pub fn verify_callback(
    cfg: &WebhooksConfig,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    body: &Bytes,
) -> Result<(), (StatusCode, Json<Value>)> {
    let checked = match cfg.auth_mode {
        WebhookAuthMode::HmacSha256 => verify_hmac_sha256(headers, body, cfg.secret.as_deref()),
        WebhookAuthMode::Token => verify_query_token(query, cfg.secret.as_deref()),
        WebhookAuthMode::None => Ok(()),
    };
    checked.map_err(|reason| auth_error(&reason))
}

/// Verify HMAC-SHA256 over the raw body: `sha256=<hex>` in X-Wakeup-Signature.
fn verify_hmac_sha256(headers: &HeaderMap, body: &Bytes, secret: Option<&str>) -> Result<(), String> {
    let secret = secret.ok_or_else(|| "no HMAC secret configured".to_string())?;

    let sig_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Wakeup-Signature header".to_string())?;

    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed X-Wakeup-Signature header".to_string())?;

    let expected =
        hex::decode(sig_hex).map_err(|_| "X-Wakeup-Signature is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);

    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch".to_string())
}

fn verify_query_token(query: &HashMap<String, String>, secret: Option<&str>) -> Result<(), String> {
    let expected = secret.ok_or_else(|| "no callback token configured".to_string())?;
    match query.get("token") {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err("callback token mismatch".to_string()),
        None => Err("missing token query parameter".to_string()),
    }
}

/// Check `Authorization: Bearer <token>` against `gateway.api_token`.
/// No configured token means the API is open.
pub fn verify_api_token(headers: &HeaderMap, expected: Option<&str>) -> Result<(), (StatusCode, Json<Value>)> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    match token {
        Some(t) if t == expected => Ok(()),
        Some(_) => Err(auth_error("bearer token mismatch")),
        None => Err(auth_error("missing bearer token")),
    }
}

fn auth_error(reason: &str) -> (StatusCode, Json<Value>) {
    warn!(reason = %reason, "request authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "authentication failed", "reason": reason})),
    )
}

/// `sha256=<hex>` signature for `body`, as a sender would compute it.
#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
