//! Role, state and error types for the reconciliation state machine.

use std::fmt;
use std::str::FromStr;

use crate::config::MissingKey;
use crate::executor::CommandError;
use crate::ledger::{LedgerError, PolicyType};

/// Node roles a reconciliation run can converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
	Master,
	Operator,
	Publisher,
	Query,
	Standalone,
	StandalonePublisher,
}

impl NodeRole {
	/// Whether the run declares a cluster policy before the node policy.
	pub fn declares_cluster(&self) -> bool {
		matches!(self, NodeRole::Operator | NodeRole::Standalone)
	}

	/// The policy type this role declares for the node itself.
	pub fn policy_type(&self) -> PolicyType {
		match self {
			NodeRole::Master => PolicyType::Master,
			NodeRole::Operator | NodeRole::Standalone => PolicyType::Operator,
			NodeRole::Publisher | NodeRole::StandalonePublisher => PolicyType::Publisher,
			NodeRole::Query => PolicyType::Query,
		}
	}

	/// Whether the node hosts the ledger itself. Standalone roles combine a
	/// master with a worker on one machine and declare both policies.
	pub fn hosts_ledger(&self) -> bool {
		matches!(
			self,
			NodeRole::Master | NodeRole::Standalone | NodeRole::StandalonePublisher
		)
	}

	/// Whether the node ingests data through the operator process.
	pub fn ingests_data(&self) -> bool {
		matches!(self, NodeRole::Operator | NodeRole::Standalone)
	}

	/// Whether the node forwards data through the publisher process.
	pub fn publishes_data(&self) -> bool {
		matches!(self, NodeRole::Publisher | NodeRole::StandalonePublisher)
	}
}

impl FromStr for NodeRole {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw.trim().to_lowercase().as_str() {
			"master" | "ledger" => Ok(NodeRole::Master),
			"operator" => Ok(NodeRole::Operator),
			"publisher" => Ok(NodeRole::Publisher),
			"query" => Ok(NodeRole::Query),
			"standalone" => Ok(NodeRole::Standalone),
			"standalone-publisher" | "standalone_publisher" => Ok(NodeRole::StandalonePublisher),
			other => Err(other.to_string()),
		}
	}
}

impl fmt::Display for NodeRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			NodeRole::Master => "master",
			NodeRole::Operator => "operator",
			NodeRole::Publisher => "publisher",
			NodeRole::Query => "query",
			NodeRole::Standalone => "standalone",
			NodeRole::StandalonePublisher => "standalone-publisher",
		};
		f.write_str(name)
	}
}

/// States of one reconciliation run, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReconcileState {
	Start,
	ConfigResolved,
	DatabasesReady,
	SchedulerReady,
	ClusterDeclared,
	NodePolicyDeclared,
	ServiceStarted,
	Done,
}

impl fmt::Display for ReconcileState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ReconcileState::Start => "start",
			ReconcileState::ConfigResolved => "config_resolved",
			ReconcileState::DatabasesReady => "databases_ready",
			ReconcileState::SchedulerReady => "scheduler_ready",
			ReconcileState::ClusterDeclared => "cluster_declared",
			ReconcileState::NodePolicyDeclared => "node_policy_declared",
			ReconcileState::ServiceStarted => "service_started",
			ReconcileState::Done => "done",
		};
		f.write_str(name)
	}
}

/// Typed failures halting a reconciliation run.
///
/// The machine never rolls back earlier states: the ledger is append-only
/// and there is no compensating action for a policy already declared.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
	/// A required configuration key was absent. Terminal, not retryable.
	#[error("missing required configuration key: {0}")]
	ConfigMissing(String),

	/// A configuration key carried a value the engine cannot act on.
	#[error("unsupported value for configuration key {key}: {value}")]
	ConfigInvalid { key: String, value: String },

	/// The node or ledger could not be reached after bounded retries.
	#[error("node or ledger unreachable: {0}")]
	Connectivity(String),

	/// The ledger refused a prepare or insert. Carries the attempted payload
	/// for diagnosis; never retried automatically.
	#[error("ledger rejected {stage} of {policy_type} policy: {payload}")]
	LedgerRejected {
		stage: &'static str,
		policy_type: PolicyType,
		payload: String,
	},

	/// A post succeeded but the confirming re-query came back empty. Usually
	/// propagation lag; re-running later is the recovery.
	#[error("{policy_type} policy posted but not yet visible for selector `{selector}`")]
	LedgerInconsistent {
		policy_type: PolicyType,
		selector: String,
	},

	/// Another reconciliation run holds this node.
	#[error("another reconciliation run is already in progress")]
	AlreadyInProgress,

	#[error("malformed node response: {0}")]
	MalformedResponse(String),
}

impl From<MissingKey> for ReconcileError {
	fn from(error: MissingKey) -> Self {
		ReconcileError::ConfigMissing(error.0)
	}
}

impl From<CommandError> for ReconcileError {
	fn from(error: CommandError) -> Self {
		match error {
			CommandError::Malformed(detail) => ReconcileError::MalformedResponse(detail),
			other => ReconcileError::Connectivity(other.to_string()),
		}
	}
}

impl From<LedgerError> for ReconcileError {
	fn from(error: LedgerError) -> Self {
		match error {
			LedgerError::Command(inner) => inner.into(),
			LedgerError::Rejected {
				stage,
				policy_type,
				payload,
			} => ReconcileError::LedgerRejected {
				stage,
				policy_type,
				payload,
			},
			LedgerError::Malformed(detail) => ReconcileError::MalformedResponse(detail),
		}
	}
}

/// A reconciliation run halted before reaching `Done`.
#[derive(Debug, thiserror::Error)]
#[error("reconciliation halted at {state}: {error}")]
pub struct ReconcileFailure {
	pub state: ReconcileState,
	#[source]
	pub error: ReconcileError,
}
