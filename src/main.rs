//! Backstage workflow server entry point
//!
//! Serves:
//! - Workflow, trigger and history API at /api/*
//! - Event intake at /api/events and webhook firing at /webhook/{trigger_id}
//! - Health check at /healthz

use backstage::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults to 0.0.0.0:3004 and sqlite://data/backstage.db
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
