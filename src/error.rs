//! Typed domain errors.
//!
//! Infrastructure paths (storage, wiring) use `anyhow`; the errors below are the
//! ones callers are expected to match on.

use thiserror::Error;

/// Structural problems found in a workflow graph definition.
///
/// The validator stops at the first violation, so a definition with several
/// problems reports only one of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow graph has no trigger node")]
    MissingTrigger,

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("condition node '{node_id}' has an outgoing edge '{edge_id}' without a branch label")]
    UnlabeledConditionBranch { node_id: String, edge_id: String },

    #[error("condition node '{node_id}' uses unknown branch label '{label}' (expected \"true\" or \"false\")")]
    UnknownBranchLabel { node_id: String, label: String },

    #[error("condition node '{node_id}' has more than one '{label}' branch")]
    DuplicateBranch { node_id: String, label: String },

    #[error("condition node '{0}' has no labeled outgoing edge")]
    ConditionWithoutBranches(String),

    #[error("workflow graph contains a cycle through node '{0}'")]
    CycleDetected(String),

    #[error("no trigger node leads to any other node")]
    NoReachableTerminal,
}

/// Problems with a schedule trigger's cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("cron expression is empty")]
    Empty,

    #[error("cron expression '{expression}' has {found} fields, expected 5")]
    FieldCount { expression: String, found: usize },

    #[error("invalid cron expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },
}

/// Problems evaluating a condition node or an event threshold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("condition node has no expression")]
    MissingExpression,

    #[error("malformed condition expression '{0}'")]
    Malformed(String),

    #[error("unknown comparison operator '{0}'")]
    UnknownOperator(String),
}

/// Problems applying a data-node transform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("data node has no 'transform' setting")]
    MissingTransform,

    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    #[error("transform '{transform}' is missing '{key}'")]
    MissingKey { transform: &'static str, key: &'static str },

    #[error("aggregate source '{0}' is not an array")]
    NotAnArray(String),

    #[error("unknown aggregate operation '{0}'")]
    UnknownOperation(String),
}
