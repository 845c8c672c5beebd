//! Delivery status callbacks: POST /webhooks/delivery.
//!
//! The provider posts form-encoded status updates for every SMS and call.
//! Authenticated callbacks are always acknowledged with 200 so the provider
//! stops retrying, even when they cannot be used; only a storage failure
//! returns 500.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use wakeup_notify::StatusCallback;

use crate::app::AppState;
use crate::http::auth::verify_callback;

pub async fn delivery_status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    verify_callback(&state.config.webhooks, &headers, &query, &body)?;

    let fields: HashMap<String, String> = match serde_urlencoded::from_bytes(&body) {
        Ok(fields) => fields,
        Err(e) => {
            warn!(error = %e, "invalid form body in delivery callback, ignored");
            return Ok(ignored());
        }
    };

    let Some(callback) = StatusCallback::from_form(&fields) else {
        warn!(fields = ?fields.keys().collect::<Vec<_>>(), "delivery callback without MessageSid or CallSid, ignored");
        return Ok(ignored());
    };

    let outcome = state.reconciler.reconcile(&callback).map_err(|e| {
        error!(provider_id = %callback.provider_id, error = %e, "failed to store delivery callback");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal error"})),
        )
    })?;

    info!(provider_id = %callback.provider_id, status = %callback.status, ?outcome, "delivery callback processed");
    Ok(Json(json!({"ok": true, "outcome": outcome})))
}

fn ignored() -> Json<Value> {
    Json(json!({"ok": true, "outcome": "ignored"}))
}

#[cfg(test)]
mod tests {
    use crate::app::test_support::test_app;
    use crate::http::auth::{sign, SIGNATURE_HEADER};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;
    use wakeup_core::{config::WebhookAuthMode, WakeupConfig};

    fn form(uri: &str, body: &'static str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn matched_callback_marks_delivered() {
        let app = test_app(WakeupConfig::default());
        app.db
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO notification_log
                 (kind, to_address, content, status, provider_id, is_demo, created_at, updated_at)
                 VALUES ('sms', '+1555', 'hi', 'sent', 'SM42', 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let resp = app
            .router
            .clone()
            .oneshot(form("/webhooks/delivery", "MessageSid=SM42&MessageStatus=delivered"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(json_body(resp).await["outcome"], "delivered");

        let status: String = app
            .db
            .lock()
            .unwrap()
            .query_row("SELECT status FROM notification_log WHERE provider_id = 'SM42'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "delivered");
    }

    #[tokio::test]
    async fn unmatched_callback_is_still_acknowledged() {
        let app = test_app(WakeupConfig::default());
        let resp = app
            .router
            .oneshot(form("/webhooks/delivery", "CallSid=CA9&CallStatus=completed"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(json_body(resp).await["outcome"], "unmatched");
    }

    #[tokio::test]
    async fn unusable_callbacks_are_acknowledged_and_ignored() {
        let app = test_app(WakeupConfig::default());
        let resp = app
            .router
            .clone()
            .oneshot(form("/webhooks/delivery", "MessageStatus=delivered"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(json_body(resp).await["outcome"], "ignored");

        let resp = app
            .router
            .oneshot(form("/webhooks/delivery", "MessageSid=+&MessageStatus=sent"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(json_body(resp).await["outcome"], "ignored");

        let audited: i64 = app
            .db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM provider_webhooks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(audited, 0);
    }

    #[tokio::test]
    async fn hmac_mode_requires_signature() {
        let mut config = WakeupConfig::default();
        config.webhooks.auth_mode = WebhookAuthMode::HmacSha256;
        config.webhooks.secret = Some("k".into());
        let app = test_app(config);

        let body = "MessageSid=SM1&MessageStatus=sent";
        let unsigned = app
            .router
            .clone()
            .oneshot(form("/webhooks/delivery", body))
            .await
            .unwrap();
        assert_eq!(unsigned.status(), 401);

        let mut signed = form("/webhooks/delivery", body);
        signed
            .headers_mut()
            .insert(SIGNATURE_HEADER, sign("k", body.as_bytes()).parse().unwrap());
        let resp = app.router.oneshot(signed).await.unwrap();
        assert_eq!(resp.status(), 200);
    }
}
