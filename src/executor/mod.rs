//! Command execution seam.
//!
//! All reconciliation logic issues node commands through [`CommandExecutor`];
//! the REST transport in [`rest`] is the only code that knows the wire
//! mechanics, and tests substitute a scripted node for it.

/// HTTP transport implementation.
mod rest;
/// Outcome and error types shared by every executor.
mod types;

/// Scripted in-process node used by tests across the crate.
#[cfg(test)]
pub mod testing;

pub use rest::RestExecutor;
pub use types::*;

/// Capability set for executing named commands against a node.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
	/// Execute a read-only command and return the parsed body.
	async fn get(&self, command: &str) -> Result<CommandOutcome, CommandError>;

	/// Execute a state-changing command with an optional payload body.
	async fn post(&self, command: &str, payload: Option<&str>) -> Result<CommandOutcome, CommandError>;
}
