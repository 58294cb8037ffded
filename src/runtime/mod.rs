//! Runtime: everything that makes workflows run
//!
//! - Graph execution (BFS walk, branching, per-node failure capture)
//! - Action handler registry
//! - Condition evaluation, `{{variable}}` interpolation, data transforms
//! - Event fan-out and live cron reconciliation

// Graph walk and execution bookkeeping
pub mod engine;

// Pluggable action handlers keyed by node subtype
pub mod actions;

pub mod condition;
pub mod interpolate;
pub mod transform;

// Platform event fan-out
pub mod dispatcher;

// Cron jobs kept in sync with schedule triggers
pub mod scheduler;

pub use actions::{ActionHandler, ActionRegistry};
pub use dispatcher::EventDispatcher;
pub use engine::ExecutionEngine;
pub use scheduler::ScheduleReconciler;
