//! HTTP API Layer
//!
//! - Workflow, trigger and execution-history endpoints
//! - Event intake and webhook firing
//! - Health check

// Workflow management endpoints (CRUD, activation, triggers, history)
pub mod workflows;

// Event and webhook firing endpoints
pub mod webhooks;

pub use webhooks::create_webhook_routes;
pub use workflows::{create_workflow_routes, AppState};

use axum::{routing::get, Router};

/// Assemble every route over the shared state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_webhook_routes())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
