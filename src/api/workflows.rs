//! Workflow management REST API endpoints
//!
//! CRUD for workflows and their triggers, activation, manual execution and
//! execution history. Every trigger-affecting change runs one schedule
//! reconciliation so cron edits apply before the next interval.

use crate::{
    runtime::{
        dispatcher::EventDispatcher,
        engine::ExecutionEngine,
        scheduler::{to_scheduler_expression, ScheduleReconciler},
    },
    workflow::{
        execution::TriggeredBy,
        storage::WorkflowStorage,
        trigger::{TriggerType, WorkflowTrigger},
        types::{GraphDefinition, NewWorkflow, Workflow, WorkflowCategory, WorkflowStatus},
        validator,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow storage for persistence
    pub storage: WorkflowStorage,
    /// Execution engine for manual and webhook runs
    pub engine: Arc<ExecutionEngine>,
    /// Live cron registry
    pub reconciler: Arc<ScheduleReconciler>,
    /// Fan-out of platform events
    pub dispatcher: EventDispatcher,
}

/// Error response: status plus `{ "error": "..." }`
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub(crate) fn internal(context: &str, e: anyhow::Error) -> ApiError {
    tracing::error!("❌ {}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub artist_id: Option<String>,
}

/// Partial update; absent fields keep their value
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkflowRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<WorkflowCategory>,
    pub definition: Option<GraphDefinition>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTriggerRequest {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub config: Value,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTriggerRequest {
    pub config: Option<Value>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/activate", post(activate_workflow))
        .route("/api/workflows/{id}/pause", post(pause_workflow))
        .route("/api/workflows/{id}/triggers", post(create_trigger).get(list_triggers))
        .route("/api/triggers/{id}", put(update_trigger).delete(delete_trigger))
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/logs", get(get_execution_logs))
}

/// Run one reconciliation after a trigger-affecting change. Failures are
/// logged by the reconciler and retried on its next interval.
async fn resync_schedules(state: &AppState) {
    let _ = state.reconciler.reconcile().await;
}

async fn load_workflow(state: &AppState, id: &str) -> Result<Workflow, ApiError> {
    match state.storage.get_workflow(id).await {
        Ok(Some(workflow)) => Ok(workflow),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("Workflow {} not found", id))),
        Err(e) => Err(internal("Failed to load workflow", e)),
    }
}

async fn load_trigger(state: &AppState, id: &str) -> Result<WorkflowTrigger, ApiError> {
    match state.storage.get_trigger(id).await {
        Ok(Some(trigger)) => Ok(trigger),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("Trigger {} not found", id))),
        Err(e) => Err(internal("Failed to load trigger", e)),
    }
}

/// POST /api/workflows
/// Body: { "artistId": "...", "name": "...", "definition": { "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<NewWorkflow>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    if payload.name.trim().is_empty() || payload.artist_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "name and artistId are required"));
    }

    let workflow = payload.into_workflow();
    state
        .storage
        .create_workflow(&workflow)
        .await
        .map_err(|e| internal("Failed to save workflow", e))?;

    tracing::info!("📝 Created workflow: {} ({}) for artist {}", workflow.id, workflow.name, workflow.artist_id);
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /api/workflows?artist_id=...
async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<Value>, ApiError> {
    let workflows = state
        .storage
        .list_workflows(query.artist_id.as_deref())
        .await
        .map_err(|e| internal("Failed to list workflows", e))?;

    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    load_workflow(&state, &id).await.map(Json)
}

/// PUT /api/workflows/{id}
///
/// An active workflow only accepts a definition that is still activatable.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateWorkflowRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let mut workflow = load_workflow(&state, &id).await?;

    if let Some(name) = payload.name {
        if name.trim().is_empty() {
            return Err(api_error(StatusCode::BAD_REQUEST, "name must not be empty"));
        }
        workflow.name = name;
    }
    if let Some(description) = payload.description {
        workflow.description = Some(description);
    }
    if let Some(category) = payload.category {
        workflow.category = category;
    }
    if let Some(tags) = payload.tags {
        workflow.tags = tags;
    }
    if let Some(definition) = payload.definition {
        if workflow.status == WorkflowStatus::Active {
            validator::validate_for_activation(&definition)
                .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
        }
        workflow.definition = definition;
    }

    state
        .storage
        .update_workflow(&workflow)
        .await
        .map_err(|e| internal("Failed to update workflow", e))?;

    tracing::info!("🔥 Updated workflow: {} ({})", workflow.id, workflow.name);
    load_workflow(&state, &id).await.map(Json)
}

/// DELETE /api/workflows/{id}
///
/// Triggers go with the workflow; execution history stays.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.storage.delete_workflow(&id).await {
        Ok(true) => {
            resync_schedules(&state).await;
            tracing::info!("🗑️ Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("Workflow {} not found", id))),
        Err(e) => Err(internal("Failed to delete workflow", e)),
    }
}

/// POST /api/workflows/{id}/activate
async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let workflow = load_workflow(&state, &id).await?;

    if let Err(e) = validator::validate_for_activation(&workflow.definition) {
        tracing::warn!("⚠️ Refusing to activate workflow {}: {}", id, e);
        return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()));
    }

    let missing = state.engine.unregistered_actions(&workflow.definition);
    if !missing.is_empty() {
        tracing::warn!("⚠️ Workflow {} uses actions with no handler: {}", id, missing.join(", "));
    }

    state
        .storage
        .set_workflow_status(&id, WorkflowStatus::Active)
        .await
        .map_err(|e| internal("Failed to activate workflow", e))?;
    resync_schedules(&state).await;

    tracing::info!("▶️ Activated workflow: {}", id);
    load_workflow(&state, &id).await.map(Json)
}

/// POST /api/workflows/{id}/pause
async fn pause_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let updated = state
        .storage
        .set_workflow_status(&id, WorkflowStatus::Paused)
        .await
        .map_err(|e| internal("Failed to pause workflow", e))?;
    if !updated {
        return Err(api_error(StatusCode::NOT_FOUND, format!("Workflow {} not found", id)));
    }
    resync_schedules(&state).await;

    tracing::info!("⏸️ Paused workflow: {}", id);
    load_workflow(&state, &id).await.map(Json)
}

/// Reject trigger configs the runtime could never act on
fn check_trigger_config(trigger_type: TriggerType, config: &Value) -> Result<(), ApiError> {
    let invalid = |message: String| Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, message));

    if !config.is_object() {
        return invalid("trigger config must be a JSON object".to_string());
    }
    match trigger_type {
        TriggerType::Schedule => {
            // A missing schedule is allowed while the trigger is being set up
            if let Some(expression) = config.get("schedule") {
                let Some(expression) = expression.as_str() else {
                    return invalid("'schedule' must be a string".to_string());
                };
                if let Err(e) = to_scheduler_expression(expression) {
                    return invalid(e.to_string());
                }
            }
            Ok(())
        }
        TriggerType::Event => {
            if config.get("eventType").and_then(Value::as_str).is_none() {
                return invalid("event triggers need an 'eventType'".to_string());
            }
            if let Some(comparison) = config.get("comparison").and_then(Value::as_str) {
                if let Err(e) = comparison.parse::<crate::runtime::condition::Comparison>() {
                    return invalid(e.to_string());
                }
            }
            Ok(())
        }
        TriggerType::Webhook | TriggerType::Manual => Ok(()),
    }
}

/// POST /api/workflows/{id}/triggers
/// Body: { "type": "schedule", "config": { "schedule": "0 9 * * 1" } }
async fn create_trigger(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(payload): Json<CreateTriggerRequest>,
) -> Result<(StatusCode, Json<WorkflowTrigger>), ApiError> {
    let workflow = load_workflow(&state, &workflow_id).await?;

    let config = if payload.config.is_null() { json!({}) } else { payload.config };
    check_trigger_config(payload.trigger_type, &config)?;

    let mut trigger = WorkflowTrigger::new(&workflow.id, payload.trigger_type, config);
    trigger.is_active = payload.is_active.unwrap_or(true);

    state
        .storage
        .create_trigger(&trigger)
        .await
        .map_err(|e| internal("Failed to save trigger", e))?;
    resync_schedules(&state).await;

    tracing::info!("🎯 Created {} trigger {} for workflow {}", trigger.trigger_type.as_str(), trigger.id, workflow.id);
    // Re-read: a trigger created on a paused workflow is held until activation
    let stored = load_trigger(&state, &trigger.id).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET /api/workflows/{id}/triggers
async fn list_triggers(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    load_workflow(&state, &workflow_id).await?;
    let triggers = state
        .storage
        .list_triggers(&workflow_id)
        .await
        .map_err(|e| internal("Failed to list triggers", e))?;

    Ok(Json(json!({ "triggers": triggers })))
}

/// PUT /api/triggers/{id}
async fn update_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTriggerRequest>,
) -> Result<Json<WorkflowTrigger>, ApiError> {
    let existing = load_trigger(&state, &id).await?;

    let config = payload.config.unwrap_or(existing.config);
    check_trigger_config(existing.trigger_type, &config)?;

    state
        .storage
        .update_trigger(&id, &config, payload.is_active)
        .await
        .map_err(|e| internal("Failed to update trigger", e))?;
    resync_schedules(&state).await;

    let trigger = load_trigger(&state, &id).await?;
    tracing::info!("🔥 Updated trigger {} (active: {})", id, trigger.is_active);
    Ok(Json(trigger))
}

/// DELETE /api/triggers/{id}
async fn delete_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.storage.delete_trigger(&id).await {
        Ok(true) => {
            resync_schedules(&state).await;
            tracing::info!("🗑️ Deleted trigger: {}", id);
            Ok(Json(json!({ "message": "Trigger deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("Trigger {} not found", id))),
        Err(e) => Err(internal("Failed to delete trigger", e)),
    }
}

/// POST /api/workflows/{id}/execute
/// Body (optional): the trigger payload
///
/// Waits for the run. A failed run answers 422 with the same result body.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid JSON payload for manual run of {}: {}", id, e);
            api_error(StatusCode::BAD_REQUEST, format!("Invalid JSON payload: {}", e))
        })?
    };

    let result = state.engine.execute_workflow(&id, TriggeredBy::Manual, payload).await;
    let status = if result.success { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };

    Ok((status, Json(json!(result))))
}

/// GET /api/workflows/{id}/executions?limit=50
async fn list_executions(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let executions = state
        .storage
        .list_executions(&workflow_id, limit)
        .await
        .map_err(|e| internal("Failed to list executions", e))?;

    Ok(Json(json!({ "executions": executions })))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.storage.get_execution(&id).await {
        Ok(Some(execution)) => Ok(Json(json!(execution))),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("Execution {} not found", id))),
        Err(e) => Err(internal("Failed to load execution", e)),
    }
}

/// GET /api/executions/{id}/logs
async fn get_execution_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let logs = state
        .storage
        .get_execution_logs(&id)
        .await
        .map_err(|e| internal("Failed to load execution logs", e))?;

    Ok(Json(json!({ "executionId": id, "logs": logs })))
}
