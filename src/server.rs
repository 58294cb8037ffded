//! Server setup and initialization
//!
//! Wires together storage, the action registry, the execution engine, the
//! schedule reconciler, the event dispatcher and the HTTP routes.

use crate::{
    api::{create_router, AppState},
    config::Config,
    runtime::{
        actions::ActionRegistry, dispatcher::EventDispatcher, engine::ExecutionEngine,
        scheduler::ScheduleReconciler,
    },
    workflow::storage::WorkflowStorage,
};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the shared application state on top of an existing store.
///
/// Hosts register their platform action handlers (`send_email`,
/// `post_social`, ...) in `actions` before calling this.
pub async fn build_state(storage: WorkflowStorage, actions: ActionRegistry, config: &Config) -> Result<AppState> {
    tracing::info!("⚙️ Action handlers registered: {:?}", actions.subtypes());

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(storage.clone(), Arc::new(actions), &config.engine));

    tracing::info!("⏰ Initializing schedule reconciler");
    let reconciler = Arc::new(
        ScheduleReconciler::new(Arc::clone(&engine), &config.scheduler)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize schedule reconciler: {}", e))?,
    );

    let dispatcher = EventDispatcher::new(Arc::clone(&engine));

    Ok(AppState {
        storage,
        engine,
        reconciler,
        dispatcher,
    })
}

/// Create the main Axum application with all routes and background services
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📋 Initializing workflow storage");
    let storage = WorkflowStorage::connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open workflow database: {}", e))?;

    let state = build_state(storage, ActionRegistry::with_builtins(), &config).await?;

    // Start the reconciler in background
    let reconciler = Arc::clone(&state.reconciler);
    tokio::spawn(async move {
        if let Err(e) = reconciler.start().await {
            tracing::error!("❌ Failed to start schedule reconciler: {}", e);
        }
    });

    tracing::info!("✅ Application initialized successfully");
    Ok(create_router(state))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Backstage workflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
