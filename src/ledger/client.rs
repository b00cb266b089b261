//! Ledger primitives built on the command executor.
//!
//! The ledger imposes a two-phase declaration: `blockchain prepare` stages
//! the policy on the node and assigns its id, `blockchain insert` publishes
//! it. Insert success does not imply query visibility; propagation is
//! eventually consistent and callers re-query before relying on a record.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::executor::{CommandError, CommandExecutor, CommandOutcome};

use super::policy::{DeclaredPolicy, NewPolicy, PolicyType, Selector};

/// Result of a selector query against the ledger. "Not found" is a value,
/// never an error.
#[derive(Debug, Clone)]
pub enum PolicyLookup {
	Found(DeclaredPolicy),
	NotFound,
}

/// A policy staged on the node via prepare, carrying the ledger-assigned id
/// it will be inserted with.
#[derive(Debug, Clone)]
pub struct PreparedPolicy {
	pub policy_type: PolicyType,
	pub id: String,
	pub raw: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error(transparent)]
	Command(#[from] CommandError),

	#[error("ledger rejected {stage} of {policy_type} policy: {payload}")]
	Rejected {
		stage: &'static str,
		policy_type: PolicyType,
		payload: String,
	},

	#[error("malformed ledger response: {0}")]
	Malformed(String),
}

/// Client for the `blockchain get` / `prepare` / `insert` primitives.
pub struct LedgerClient {
	executor: Arc<dyn CommandExecutor>,
}

impl LedgerClient {
	pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
		Self { executor }
	}

	/// Query the ledger for a policy matching the selector.
	///
	/// When several records match, the first one returned wins; selector
	/// uniqueness is the caller's responsibility.
	pub async fn get_policy(
		&self,
		policy_type: PolicyType,
		selector: &Selector,
	) -> Result<PolicyLookup, LedgerError> {
		let command = format!("blockchain get {policy_type} where {}", selector.to_where_clause());
		debug!("querying ledger: `{}`", command);
		let outcome = self.executor.get(&command).await?;
		if outcome.is_empty() {
			return Ok(PolicyLookup::NotFound);
		}

		let record = match &outcome {
			CommandOutcome::Json(Value::Array(records)) => {
				if records.len() > 1 {
					warn!(
						"selector matched {} {} policies, using the first",
						records.len(),
						policy_type
					);
				}
				records.first().cloned()
			}
			CommandOutcome::Json(value) => Some(value.clone()),
			CommandOutcome::Text(raw) => serde_json::from_str(raw).ok(),
		};
		let Some(record) = record else {
			return Ok(PolicyLookup::NotFound);
		};

		match DeclaredPolicy::from_record(policy_type, &record) {
			Some(declared) => Ok(PolicyLookup::Found(declared)),
			None => Err(LedgerError::Malformed(format!(
				"{policy_type} record without an id: {record}"
			))),
		}
	}

	/// Stage a candidate policy on the node so it can be inserted.
	///
	/// A prepare failure is fatal for this attempt; there is no insert
	/// without a successful prepare.
	pub async fn prepare_policy(&self, policy: &NewPolicy) -> Result<PreparedPolicy, LedgerError> {
		let payload = policy.to_payload();
		self.executor
			.post("blockchain prepare policy !new_policy", Some(&payload))
			.await
			.map_err(|error| match error {
				CommandError::Rejected { .. } => LedgerError::Rejected {
					stage: "prepare",
					policy_type: policy.policy_type(),
					payload: payload.clone(),
				},
				other => LedgerError::Command(other),
			})?;

		// The node stores the staged policy, id included, in its dictionary.
		let staged = self.staged_policy().await?;
		let declared = DeclaredPolicy::from_record(policy.policy_type(), &staged).ok_or_else(|| {
			LedgerError::Malformed(format!(
				"staged {} policy has no id: {staged}",
				policy.policy_type()
			))
		})?;
		info!("prepared {} policy with id {}", policy.policy_type(), declared.id);
		Ok(PreparedPolicy {
			policy_type: policy.policy_type(),
			id: declared.id,
			raw: staged.to_string(),
		})
	}

	/// Insert the previously staged policy into the ledger at `ledger_conn`.
	pub async fn post_policy(&self, prepared: &PreparedPolicy, ledger_conn: &str) -> Result<(), LedgerError> {
		let command =
			format!("blockchain insert where policy=!new_policy and local=true and master={ledger_conn}");
		self.executor.post(&command, None).await.map_err(|error| match error {
			CommandError::Rejected { .. } => LedgerError::Rejected {
				stage: "insert",
				policy_type: prepared.policy_type,
				payload: prepared.raw.clone(),
			},
			other => LedgerError::Command(other),
		})?;
		info!(
			"inserted {} policy {} into ledger at {}",
			prepared.policy_type, prepared.id, ledger_conn
		);
		Ok(())
	}

	/// Read the staged `new_policy` entry back from the node dictionary.
	async fn staged_policy(&self) -> Result<Value, LedgerError> {
		let outcome = self.executor.get("get dictionary where format=json").await?;
		let dictionary = outcome
			.as_json()
			.and_then(Value::as_object)
			.ok_or_else(|| LedgerError::Malformed("node dictionary is not a JSON object".to_string()))?;
		let staged = dictionary
			.get("new_policy")
			.ok_or_else(|| LedgerError::Malformed("no staged policy in node dictionary after prepare".to_string()))?;
		match staged {
			Value::String(raw) => serde_json::from_str(raw)
				.map_err(|error| LedgerError::Malformed(format!("staged policy is not valid JSON: {error}"))),
			other => Ok(other.clone()),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::json;

	use crate::executor::testing::MockNode;

	use super::super::policy::{cluster_policy, cluster_selector};
	use super::*;

	#[tokio::test]
	async fn selector_finds_the_seeded_policy() {
		let node = Arc::new(MockNode::new());
		let id = node.seed_policy("cluster", json!({ "name": "c1", "company": "Acme" }));
		node.seed_policy("cluster", json!({ "name": "c2", "company": "Acme" }));
		let ledger = LedgerClient::new(node);

		let lookup = ledger
			.get_policy(PolicyType::Cluster, &cluster_selector("c1", "Acme"))
			.await
			.expect("query succeeds");

		let PolicyLookup::Found(declared) = lookup else {
			panic!("expected the seeded cluster policy");
		};
		assert_eq!(declared.id, id);
		assert!(declared.date.is_some());
		assert_eq!(declared.fields.get("name").and_then(Value::as_str), Some("c1"));
	}

	#[tokio::test]
	async fn absent_policy_is_not_found() {
		let node = Arc::new(MockNode::new());
		let ledger = LedgerClient::new(node);

		let lookup = ledger
			.get_policy(PolicyType::Cluster, &cluster_selector("ghost", "Acme"))
			.await
			.expect("query succeeds");
		assert!(matches!(lookup, PolicyLookup::NotFound));
	}

	#[tokio::test]
	async fn prepare_then_post_publishes_one_record() {
		let node = Arc::new(MockNode::new());
		let ledger = LedgerClient::new(node.clone());
		let policy = cluster_policy("c1", "Acme", Some("db1"));

		let prepared = ledger.prepare_policy(&policy).await.expect("prepare succeeds");
		assert!(!prepared.id.is_empty());
		assert_eq!(node.ledger_count("cluster"), 0);

		ledger
			.post_policy(&prepared, "127.0.0.1:32048")
			.await
			.expect("insert succeeds");
		assert_eq!(node.ledger_count("cluster"), 1);

		let lookup = ledger
			.get_policy(PolicyType::Cluster, &cluster_selector("c1", "Acme"))
			.await
			.expect("query succeeds");
		let PolicyLookup::Found(declared) = lookup else {
			panic!("inserted policy should be visible");
		};
		assert_eq!(declared.id, prepared.id);
	}

	#[tokio::test]
	async fn rejected_insert_carries_the_payload() {
		let node = Arc::new(MockNode::new());
		node.fail_inserts(1);
		let ledger = LedgerClient::new(node);
		let policy = cluster_policy("c1", "Acme", None);

		let prepared = ledger.prepare_policy(&policy).await.expect("prepare succeeds");
		let error = ledger
			.post_policy(&prepared, "127.0.0.1:32048")
			.await
			.expect_err("insert is rejected");

		let LedgerError::Rejected { stage, payload, .. } = error else {
			panic!("expected a rejection");
		};
		assert_eq!(stage, "insert");
		assert!(payload.contains("c1"));
	}
}
