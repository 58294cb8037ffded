//! Event trigger dispatcher
//!
//! Platform events ("sale_completed", "tip_received", ...) fan out to every
//! active workflow of the artist with a matching event trigger. Each matching
//! workflow runs in its own task; the caller never waits and never sees an error.

use crate::runtime::engine::ExecutionEngine;
use crate::workflow::execution::TriggeredBy;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct EventDispatcher {
    engine: Arc<ExecutionEngine>,
}

impl EventDispatcher {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// Fire-and-forget entry point for event sources.
    ///
    /// Returns immediately; outcomes are only observable through execution
    /// history.
    pub fn fire_workflow_event(&self, event_type: &str, artist_id: &str, payload: Value) {
        let dispatcher = self.clone();
        let event_type = event_type.to_string();
        let artist_id = artist_id.to_string();

        tokio::spawn(async move {
            dispatcher.dispatch(&event_type, &artist_id, payload).await;
        });
    }

    /// Look up matching triggers and spawn one execution per match.
    ///
    /// Returns the handles of the spawned executions so callers that care
    /// (tests, batch jobs) can wait for them.
    pub async fn dispatch(&self, event_type: &str, artist_id: &str, payload: Value) -> Vec<JoinHandle<()>> {
        let triggers = match self
            .engine
            .storage()
            .get_active_event_triggers(event_type, artist_id)
            .await
        {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!("❌ Failed to look up '{}' triggers for artist {}: {}", event_type, artist_id, e);
                return Vec::new();
            }
        };

        let matching: Vec<_> = triggers
            .into_iter()
            .filter(|trigger| {
                let satisfied = trigger.threshold_satisfied(&payload);
                if !satisfied {
                    tracing::debug!("⏭️ Trigger {} threshold not met for '{}'", trigger.id, event_type);
                }
                satisfied
            })
            .collect();

        tracing::info!("📣 Event '{}' for artist {} matched {} workflow trigger(s)",
            event_type, artist_id, matching.len());

        matching
            .into_iter()
            .map(|trigger| {
                let engine = Arc::clone(&self.engine);
                let payload = payload.clone();

                tokio::spawn(async move {
                    engine
                        .execute_for_trigger(&trigger.id, &trigger.workflow_id, TriggeredBy::Event, payload)
                        .await;
                })
            })
            .collect()
    }
}
