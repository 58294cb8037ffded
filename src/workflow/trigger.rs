//! Registered activation rules for workflows
//!
//! A `WorkflowTrigger` is the runtime-actionable record the scheduler and the
//! event dispatcher act on, separate from the trigger node inside the graph.

use crate::runtime::condition::Comparison;
use crate::runtime::interpolate::lookup_path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Payload field compared against an event threshold when none is configured
const DEFAULT_THRESHOLD_FIELD: &str = "amount";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTrigger {
    pub id: String,
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Type-specific configuration:
    /// - schedule: `{ "schedule": "0 9 * * 1" }`
    /// - event: `{ "eventType": "sale_completed", "threshold": 100, "comparison": "gte", "field": "amount" }`
    pub config: Value,
    pub is_active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Webhook,
    Schedule,
    Event,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Webhook => "webhook",
            TriggerType::Schedule => "schedule",
            TriggerType::Event => "event",
            TriggerType::Manual => "manual",
        }
    }
}

impl FromStr for TriggerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(TriggerType::Webhook),
            "schedule" => Ok(TriggerType::Schedule),
            "event" => Ok(TriggerType::Event),
            "manual" => Ok(TriggerType::Manual),
            other => Err(anyhow::anyhow!("Unknown trigger type: {}", other)),
        }
    }
}

impl WorkflowTrigger {
    pub fn new(workflow_id: impl Into<String>, trigger_type: TriggerType, config: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            trigger_type,
            config,
            is_active: true,
            last_fired_at: None,
            created_at: Utc::now(),
        }
    }

    /// Cron expression of a schedule trigger, if configured
    pub fn schedule_expression(&self) -> Option<&str> {
        self.config.get("schedule").and_then(Value::as_str)
    }

    /// Event type an event trigger listens for
    pub fn event_type(&self) -> Option<&str> {
        self.config.get("eventType").and_then(Value::as_str)
    }

    /// Whether an event payload satisfies this trigger's optional threshold.
    ///
    /// Without a `threshold` every event of the right type matches. With one,
    /// the configured field (default `amount`) must be numeric and satisfy the
    /// comparison (default `gte`).
    pub fn threshold_satisfied(&self, payload: &Value) -> bool {
        let Some(threshold) = self.config.get("threshold") else {
            return true;
        };
        if threshold.is_null() {
            return true;
        }

        let comparison = match self
            .config
            .get("comparison")
            .and_then(Value::as_str)
            .unwrap_or("gte")
            .parse::<Comparison>()
        {
            Ok(comparison) => comparison,
            Err(e) => {
                tracing::warn!("⚠️ Trigger {} has an invalid comparison: {}", self.id, e);
                return false;
            }
        };
        let field = self
            .config
            .get("field")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_THRESHOLD_FIELD);

        match lookup_path(payload, field) {
            Some(actual) if actual.is_number() || actual.is_string() => comparison.holds(actual, threshold),
            _ => false,
        }
    }
}
