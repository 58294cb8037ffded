//! Graph execution engine
//!
//! Loads a workflow, validates its graph and walks it breadth-first from every
//! trigger node. Actions run through the [`ActionRegistry`], conditions pick
//! one labeled branch, data nodes extend the scope seen downstream. The whole
//! log is persisted together with the final status.

use crate::config::EngineConfig;
use crate::runtime::actions::ActionRegistry;
use crate::runtime::condition::Condition;
use crate::runtime::interpolate::interpolate;
use crate::runtime::transform;
use crate::workflow::execution::{
    ExecutionLogEntry, ExecutionResult, ExecutionStatus, LogStatus, TriggeredBy,
};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{Edge, GraphDefinition, Node, NodeType, Workflow, WorkflowStatus};
use crate::workflow::validator::{self, BRANCH_FALSE, BRANCH_TRUE};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Scope key under which action outputs are exposed to later nodes
const NODE_OUTPUTS_KEY: &str = "nodes";

/// Executes workflows and records their outcome
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    storage: WorkflowStorage,
    actions: Arc<ActionRegistry>,
    action_timeout: Duration,
}

/// Mutable state of one graph walk
#[derive(Debug)]
struct Run {
    scope: Value,
    logs: Vec<ExecutionLogEntry>,
    errors: Vec<String>,
}

impl Run {
    fn new(payload: &Value) -> Self {
        let scope = match payload {
            Value::Object(_) => payload.clone(),
            Value::Null => Value::Object(Map::new()),
            other => {
                let mut scope = Map::new();
                scope.insert("payload".to_string(), other.clone());
                Value::Object(scope)
            }
        };
        Self { scope, logs: Vec::new(), errors: Vec::new() }
    }

    fn record(&mut self, node: &Node, status: LogStatus, error: Option<String>) {
        if let Some(error) = &error {
            self.errors.push(format!("{} ({}): {}", node.id, node.subtype, error));
        }
        self.logs.push(ExecutionLogEntry {
            timestamp: Utc::now(),
            node_id: node.id.clone(),
            action: node.subtype.clone(),
            status,
            error,
        });
    }

    fn merge(&mut self, derived: Map<String, Value>) {
        if let Value::Object(scope) = &mut self.scope {
            scope.extend(derived);
        }
    }

    fn store_output(&mut self, node_id: &str, output: Value) {
        let Value::Object(scope) = &mut self.scope else {
            return;
        };
        let outputs = scope
            .entry(NODE_OUTPUTS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !outputs.is_object() {
            *outputs = Value::Object(Map::new());
        }
        if let Value::Object(outputs) = outputs {
            outputs.insert(node_id.to_string(), output);
        }
    }
}

impl ExecutionEngine {
    pub fn new(storage: WorkflowStorage, actions: Arc<ActionRegistry>, config: &EngineConfig) -> Self {
        Self {
            storage,
            actions,
            action_timeout: config.action_timeout(),
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    /// Action subtypes in `definition` with no registered handler, sorted and
    /// deduplicated. Such nodes fail every time they run.
    pub fn unregistered_actions(&self, definition: &GraphDefinition) -> Vec<String> {
        let mut missing: Vec<String> = definition
            .nodes
            .iter()
            .filter(|node| node.node_type == NodeType::Action && !self.actions.has(&node.subtype))
            .map(|node| node.subtype.clone())
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Execute a workflow for one trigger firing.
    ///
    /// Never returns an error: engine-level failures produce a `failed`
    /// execution (when the store allows writing one) and node-level failures
    /// are collected in `errors` while the rest of the graph keeps running.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        triggered_by: TriggeredBy,
        payload: Value,
    ) -> ExecutionResult {
        let workflow_start_time = std::time::Instant::now();
        tracing::info!("🚀 Starting workflow execution: {} (triggered by {})", workflow_id, triggered_by.as_str());

        let workflow = match self.storage.get_workflow(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                return self
                    .fail_before_start(workflow_id, triggered_by, &payload, format!("Workflow not found: {}", workflow_id))
                    .await;
            }
            Err(e) => {
                return self
                    .fail_before_start(workflow_id, triggered_by, &payload, format!("Failed to load workflow: {}", e))
                    .await;
            }
        };

        if let Some(reason) = refusal_reason(&workflow, triggered_by) {
            return self.fail_before_start(workflow_id, triggered_by, &payload, reason).await;
        }

        if let Err(e) = validator::validate(&workflow.definition) {
            return self
                .fail_before_start(workflow_id, triggered_by, &payload, format!("Invalid workflow graph: {}", e))
                .await;
        }

        let execution = match self.storage.create_execution(workflow_id, triggered_by, &payload).await {
            Ok(execution) => execution,
            Err(e) => {
                tracing::error!("❌ Could not create execution record for {}: {}", workflow_id, e);
                return ExecutionResult::failed(None, format!("Failed to create execution: {}", e));
            }
        };

        let run = self.walk(&workflow, &payload).await;
        let status = if run.errors.is_empty() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };

        let mut errors = run.errors;
        match self
            .storage
            .finish_execution(&execution.id, status, &run.logs, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("⚠️ Execution {} was already finished; outcome not rewritten", execution.id);
            }
            Err(e) => {
                tracing::error!("❌ Failed to persist execution {}: {}", execution.id, e);
                errors.push(format!("Failed to persist execution: {}", e));
            }
        }

        let success = errors.is_empty();
        if success {
            tracing::info!("🎉 Workflow '{}' execution {} succeeded in {:?}",
                workflow_id, execution.id, workflow_start_time.elapsed());
        } else {
            tracing::warn!("⚠️ Workflow '{}' execution {} failed with {} error(s) in {:?}",
                workflow_id, execution.id, errors.len(), workflow_start_time.elapsed());
        }

        ExecutionResult {
            success,
            execution_id: Some(execution.id),
            errors,
        }
    }

    /// Execute on behalf of a registered trigger and stamp `last_fired_at`
    /// when, and only when, the execution succeeded.
    pub async fn execute_for_trigger(
        &self,
        trigger_id: &str,
        workflow_id: &str,
        triggered_by: TriggeredBy,
        payload: Value,
    ) -> ExecutionResult {
        let result = self.execute_workflow(workflow_id, triggered_by, payload).await;

        if result.success {
            if let Err(e) = self.storage.record_trigger_fired(trigger_id).await {
                tracing::warn!("⚠️ Could not record firing of trigger {}: {}", trigger_id, e);
            }
        } else {
            tracing::error!("❌ {} execution of workflow {} (trigger {}) failed: {}",
                triggered_by.as_str(), workflow_id, trigger_id, result.errors.join("; "));
        }

        result
    }

    /// Record a failed execution for a firing that never reached the graph
    async fn fail_before_start(
        &self,
        workflow_id: &str,
        triggered_by: TriggeredBy,
        payload: &Value,
        error: String,
    ) -> ExecutionResult {
        tracing::error!("❌ Workflow {} not executed: {}", workflow_id, error);

        match self
            .storage
            .create_failed_execution(workflow_id, triggered_by, payload, &error)
            .await
        {
            Ok(execution_id) => ExecutionResult::failed(Some(execution_id), error),
            Err(e) => {
                tracing::error!("❌ Could not record failed execution for {}: {}", workflow_id, e);
                ExecutionResult::failed(None, error)
            }
        }
    }

    /// Breadth-first walk from all trigger nodes. Successors are queued in
    /// edge insertion order and each node runs at most once.
    async fn walk(&self, workflow: &Workflow, payload: &Value) -> Run {
        let definition = &workflow.definition;
        let mut run = Run::new(payload);
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&Node> = VecDeque::new();

        for trigger in definition.trigger_nodes() {
            if visited.insert(trigger.id.as_str()) {
                queue.push_back(trigger);
            }
        }

        let mut step = 0usize;
        while let Some(node) = queue.pop_front() {
            step += 1;
            tracing::debug!("📍 Step {}: node '{}' ({} / {})", step, node.id, node.node_type, node.subtype);

            let next: Vec<&Edge> = match node.node_type {
                NodeType::Trigger => definition.outgoing(&node.id).collect(),
                NodeType::Action => {
                    if self.run_action(node, &workflow.artist_id, &mut run).await {
                        definition.outgoing(&node.id).collect()
                    } else {
                        Vec::new()
                    }
                }
                NodeType::Condition => branch_edges(definition, node, &mut run),
                NodeType::Data => match transform::apply(&node.data, &run.scope) {
                    Ok(derived) => {
                        run.merge(derived);
                        definition.outgoing(&node.id).collect()
                    }
                    Err(e) => {
                        run.record(node, LogStatus::Failed, Some(e.to_string()));
                        Vec::new()
                    }
                },
            };

            for edge in next {
                if let Some(target) = definition.node(&edge.target) {
                    if visited.insert(target.id.as_str()) {
                        queue.push_back(target);
                    }
                }
            }
        }

        run
    }

    /// Invoke one action node. Returns whether it completed.
    async fn run_action(&self, node: &Node, owner_id: &str, run: &mut Run) -> bool {
        let Some(handler) = self.actions.get(&node.subtype) else {
            run.record(
                node,
                LogStatus::Failed,
                Some(format!("No handler registered for action '{}'", node.subtype)),
            );
            return false;
        };

        let config = interpolate(&node.data, &run.scope);
        let payload = run.scope.clone();
        let owner_id = owner_id.to_string();
        let node_start_time = std::time::Instant::now();

        let mut task = tokio::spawn(async move { handler.execute(&config, &payload, &owner_id).await });

        let outcome = match tokio::time::timeout(self.action_timeout, &mut task).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) if join_error.is_panic() => Err("Action handler panicked".to_string()),
            Ok(Err(join_error)) => Err(format!("Action handler was cancelled: {}", join_error)),
            Err(_) => {
                task.abort();
                Err(format!("Action timed out after {:?}", self.action_timeout))
            }
        };

        match outcome {
            Ok(output) => {
                tracing::info!("✅ Action '{}' ({}) completed in {:?}", node.id, node.subtype, node_start_time.elapsed());
                run.store_output(&node.id, output);
                run.record(node, LogStatus::Completed, None);
                true
            }
            Err(error) => {
                tracing::warn!("⚠️ Action '{}' ({}) failed: {}", node.id, node.subtype, error);
                run.record(node, LogStatus::Failed, Some(error));
                false
            }
        }
    }
}

/// Evaluate a condition node and return the edges of the branch taken
fn branch_edges<'a>(definition: &'a GraphDefinition, node: &'a Node, run: &mut Run) -> Vec<&'a Edge> {
    let condition = match Condition::from_node_data(&node.data) {
        Ok(condition) => condition,
        Err(e) => {
            run.record(node, LogStatus::Failed, Some(e.to_string()));
            return Vec::new();
        }
    };

    let label = if condition.evaluate(&run.scope) { BRANCH_TRUE } else { BRANCH_FALSE };
    tracing::debug!("🔀 Condition '{}' took the '{}' branch", node.id, label);

    definition
        .outgoing(&node.id)
        .filter(|edge| edge.source_handle.as_deref() == Some(label))
        .collect()
}

/// Why a firing must not run this workflow, if it must not
fn refusal_reason(workflow: &Workflow, triggered_by: TriggeredBy) -> Option<String> {
    match (workflow.status, triggered_by) {
        (WorkflowStatus::Active, _) => None,
        (WorkflowStatus::Draft, TriggeredBy::Manual) => None,
        (WorkflowStatus::Paused, _) => Some(format!("Workflow {} is paused", workflow.id)),
        (WorkflowStatus::Draft, _) => Some(format!("Workflow {} is not active", workflow.id)),
    }
}
