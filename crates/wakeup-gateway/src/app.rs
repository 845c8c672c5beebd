use axum::{
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use wakeup_core::WakeupConfig;
use wakeup_notify::{CallbackUrls, DeliveryReconciler, NotificationDispatcher};
use wakeup_scheduler::{InteractionHandler, JobStore, MessageComposer, SchedulerEngine};
use wakeup_weather::WeatherCache;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: WakeupConfig,
    pub store: Arc<JobStore>,
    /// Handle used for manual triggers; the ticking copy runs in its own task.
    pub engine: SchedulerEngine,
    pub composer: MessageComposer,
    pub urls: CallbackUrls,
    pub interactions: InteractionHandler,
    pub reconciler: Arc<DeliveryReconciler>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub weather: Arc<WeatherCache>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/webhooks/delivery",
            post(crate::http::webhooks::delivery_status_handler),
        )
        .route(
            "/voice/{execution_id}",
            get(crate::http::voice::voice_script_handler)
                .post(crate::http::voice::voice_script_handler),
        )
        .route(
            "/voice/{execution_id}/response",
            post(crate::http::voice::voice_response_handler),
        )
        .route("/api/jobs", post(crate::http::jobs::create_job))
        .route("/api/jobs/{id}", get(crate::http::jobs::get_job))
        .route("/api/jobs/{id}/status", patch(crate::http::jobs::set_status))
        .route(
            "/api/jobs/{id}/schedule",
            patch(crate::http::jobs::update_schedule),
        )
        .route(
            "/api/jobs/{id}/executions",
            get(crate::http::jobs::list_executions),
        )
        .route("/api/jobs/{id}/test", post(crate::http::jobs::trigger_test))
        .route(
            "/api/executions/{id}/deliveries",
            get(crate::http::jobs::execution_deliveries),
        )
        .route("/api/weather/log", get(crate::http::jobs::weather_api_log))
        .route(
            "/api/owners/{owner_id}/profile",
            put(crate::http::jobs::update_owner_profile),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
