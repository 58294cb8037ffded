//! Workflow Management Layer
//!
//! - Type definitions (Workflow, GraphDefinition, Node, Edge)
//! - Registered triggers and execution records
//! - Structural validation of graphs
//! - SQLite persistence with sqlx

// Core workflow type definitions
pub mod types;

// Runtime-actionable activation rules
pub mod trigger;

// Execution records, logs and results
pub mod execution;

// Graph structure checks
pub mod validator;

// SQLite persistence layer
pub mod storage;

pub use execution::{ExecutionResult, ExecutionStatus, TriggeredBy, WorkflowExecution};
pub use storage::WorkflowStorage;
pub use trigger::{TriggerType, WorkflowTrigger};
pub use types::{Edge, GraphDefinition, Node, NodeType, Workflow, WorkflowStatus};
