//! The reconciliation state machine and its policy declaration logic.

/// The top-level state machine.
mod orchestrator;
/// Idempotent policy declaration.
mod policies;
/// Roles, states and the error taxonomy.
mod types;

pub use orchestrator::NodeReconciler;
