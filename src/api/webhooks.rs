//! Inbound firing endpoints
//!
//! `POST /api/events` is the entry point for platform events (checkout,
//! inventory checks, ...). `POST /webhook/{trigger_id}` fires a registered
//! webhook trigger. Both answer 202 right away; outcomes land in execution
//! history.

use crate::api::workflows::{api_error, internal, ApiError, AppState};
use crate::workflow::execution::TriggeredBy;
use crate::workflow::trigger::TriggerType;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Body of `POST /api/events`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub event_type: String,
    pub artist_id: String,
    #[serde(default)]
    pub payload: Value,
}

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/api/events", post(fire_event))
        .route("/webhook/{trigger_id}", post(execute_webhook))
}

/// POST /api/events
/// Body: { "eventType": "sale_completed", "artistId": "...", "payload": { "amount": 120 } }
async fn fire_event(
    State(state): State<AppState>,
    Json(event): Json<WorkflowEvent>,
) -> (StatusCode, Json<Value>) {
    tracing::info!("📣 Event received: {} for artist {}", event.event_type, event.artist_id);

    let payload = if event.payload.is_null() { json!({}) } else { event.payload };
    state
        .dispatcher
        .fire_workflow_event(&event.event_type, &event.artist_id, payload);

    (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
}

/// POST /webhook/{trigger_id}
/// Body: JSON payload that becomes the execution's trigger data
async fn execute_webhook(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::info!("📥 Webhook request received for trigger {}", trigger_id);
    tracing::debug!("📄 Request body: {}", body);

    let payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        match serde_json::from_str(&body) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("❌ Invalid JSON payload for webhook {}: {}", trigger_id, e);
                return Err(api_error(StatusCode::BAD_REQUEST, format!("Invalid JSON payload: {}", e)));
            }
        }
    };

    let trigger = match state.storage.get_trigger(&trigger_id).await {
        Ok(Some(trigger)) if trigger.trigger_type == TriggerType::Webhook && trigger.is_active => trigger,
        Ok(_) => {
            tracing::warn!("❌ Webhook called for unknown or inactive trigger: {}", trigger_id);
            return Err(api_error(StatusCode::NOT_FOUND, format!("No active webhook trigger {}", trigger_id)));
        }
        Err(e) => return Err(internal("Failed to load trigger", e)),
    };

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        engine
            .execute_for_trigger(&trigger.id, &trigger.workflow_id, TriggeredBy::Webhook, payload)
            .await;
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true, "triggerId": trigger_id }))))
}
