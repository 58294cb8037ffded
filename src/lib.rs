//! Backstage: workflow automation engine for artist platforms
//!
//! Persists user-authored trigger/condition/action/data graphs, validates them,
//! runs them on events, webhooks, manual requests and cron schedules, and keeps
//! the live cron jobs in sync with the trigger table.

// Core configuration and setup
pub mod config;

// Typed domain errors
pub mod error;

// Workflow management layer - definitions, triggers, executions, storage
pub mod workflow;

// Runtime - execution engine, actions, dispatcher, schedule reconciler
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{ActionHandler, ActionRegistry, EventDispatcher, ExecutionEngine, ScheduleReconciler};
pub use server::start_server;
pub use workflow::{ExecutionResult, GraphDefinition, Workflow, WorkflowStorage};
