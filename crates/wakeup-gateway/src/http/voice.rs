//! Live voice session endpoints fetched by the telephony provider.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use wakeup_scheduler::{SchedulerError, FALLBACK_REPLY};

use crate::app::AppState;
use crate::http::{auth::verify_callback, twiml};

/// GET|POST /voice/{execution_id}: spoken script plus the interactive menu.
pub async fn voice_script_handler(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = verify_callback(&state.config.webhooks, &headers, &query, &body) {
        return rejection.into_response();
    }

    let loaded = state.store.get_execution(&execution_id).and_then(|exec| {
        let job = state.store.get_job(&exec.job_id)?;
        Ok((job, exec))
    });
    match loaded {
        Ok((job, exec)) => {
            let script = state.composer.voice_script(&job, &exec);
            let action = state.urls.voice_response(&execution_id);
            twiml::respond(StatusCode::OK, twiml::voice_script(&script, &action))
        }
        Err(SchedulerError::ExecutionNotFound { .. } | SchedulerError::JobNotFound { .. }) => {
            warn!(%execution_id, "voice script requested for unknown execution");
            twiml::respond(StatusCode::NOT_FOUND, twiml::say_and_hangup(FALLBACK_REPLY))
        }
        Err(e) => {
            error!(%execution_id, error = %e, "failed to load voice script");
            twiml::respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                twiml::say_and_hangup(FALLBACK_REPLY),
            )
        }
    }
}

/// POST /voice/{execution_id}/response: keypad or speech input from the menu.
///
/// Always answers with speakable TwiML; processing failures fall back to a
/// generic goodbye.
pub async fn voice_response_handler(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = verify_callback(&state.config.webhooks, &headers, &query, &body) {
        return rejection.into_response();
    }

    let fields: HashMap<String, String> = serde_urlencoded::from_bytes(&body).unwrap_or_else(|e| {
        warn!(%execution_id, error = %e, "unparseable voice response body");
        HashMap::new()
    });
    let raw = Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    );

    let handled = state
        .interactions
        .handle(
            &execution_id,
            fields.get("Digits").map(String::as_str),
            fields.get("SpeechResult").map(String::as_str),
            raw,
            Utc::now(),
        )
        .await;

    let speech = match handled {
        Ok(reply) => {
            info!(%execution_id, action = ?reply.action, "voice interaction handled");
            reply.speech
        }
        Err(e) => {
            error!(%execution_id, error = %e, "voice interaction failed");
            FALLBACK_REPLY.to_string()
        }
    };
    twiml::respond(StatusCode::OK, twiml::say_and_hangup(&speech))
}
