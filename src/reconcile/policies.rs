//! Idempotent policy declaration.
//!
//! Declaration always runs query-first: an equivalent policy already on the
//! ledger short-circuits to its id with zero prepares and zero inserts.
//! Otherwise the policy is prepared, inserted and re-queried; the confirming
//! read is what lets downstream stages trust the id.

use tracing::info;

use crate::config::Configuration;
use crate::ledger::{
	LedgerClient, NewPolicy, NodePolicySpec, PolicyLookup, PolicyType, Selector, cluster_policy,
	cluster_selector,
};
use crate::node::Geolocator;

use super::types::ReconcileError;

pub struct PolicyReconciler {
	ledger: LedgerClient,
	geolocator: Geolocator,
}

impl PolicyReconciler {
	pub fn new(ledger: LedgerClient, geolocator: Geolocator) -> Self {
		Self { ledger, geolocator }
	}

	/// Ensure the cluster policy exists on the ledger and return its id.
	///
	/// The id must be confirmed before any operator policy is attempted; an
	/// operator declared first would carry a dangling cluster reference that
	/// nothing later repairs.
	pub async fn ensure_cluster(&self, config: &Configuration) -> Result<String, ReconcileError> {
		let name = config.require_str("cluster_name")?;
		let company = config.require_str("company_name")?;
		let selector = cluster_selector(&name, &company);

		if let PolicyLookup::Found(existing) = self.ledger.get_policy(PolicyType::Cluster, &selector).await? {
			info!("cluster policy {} already declared ({})", name, existing.id);
			return Ok(existing.id);
		}

		let dbms = config.get_str("default_dbms");
		let policy = cluster_policy(&name, &company, dbms.as_deref());
		self.declare_and_confirm(policy, &selector, config).await
	}

	/// Ensure the node policy of the given type exists and return its id.
	pub async fn ensure_node_policy(
		&self,
		policy_type: PolicyType,
		config: &Configuration,
		cluster_id: Option<&str>,
	) -> Result<String, ReconcileError> {
		let spec = self.node_spec(config, cluster_id).await?;
		let selector = spec.selector();

		if let PolicyLookup::Found(existing) = self.ledger.get_policy(policy_type, &selector).await? {
			info!("{} policy already declared for {} ({})", policy_type, spec.name, existing.id);
			return Ok(existing.id);
		}

		let policy = spec.into_policy(policy_type);
		self.declare_and_confirm(policy, &selector, config).await
	}

	/// Build the node policy attributes, consulting the geolocation
	/// collaborator only for location fields the configuration lacks.
	async fn node_spec(
		&self,
		config: &Configuration,
		cluster_id: Option<&str>,
	) -> Result<NodePolicySpec, ReconcileError> {
		let mut spec = NodePolicySpec {
			name: config.require_str("node_name")?,
			company: config.require_str("company_name")?,
			hostname: config.get_str("hostname"),
			external_ip: config.require_str("external_ip")?,
			local_ip: config.require_str("ip")?,
			server_port: config.require_int("anylog_server_port")?,
			rest_port: config.require_int("anylog_rest_port")?,
			broker_port: config.get_int("anylog_broker_port"),
			cluster_id: cluster_id.map(str::to_string),
			member: config.get_int("member"),
			location: config.get_str("location"),
			country: config.get_str("country"),
			state: config.get_str("state"),
			city: config.get_str("city"),
		};
		if spec.location.is_none() || spec.country.is_none() || spec.state.is_none() || spec.city.is_none() {
			let resolved = self.geolocator.resolve().await;
			spec.location.get_or_insert(resolved.location);
			spec.country.get_or_insert(resolved.country);
			spec.state.get_or_insert(resolved.state);
			spec.city.get_or_insert(resolved.city);
		}
		Ok(spec)
	}

	/// Prepare, post and confirm a policy; returns the confirmed ledger id.
	async fn declare_and_confirm(
		&self,
		policy: NewPolicy,
		selector: &Selector,
		config: &Configuration,
	) -> Result<String, ReconcileError> {
		let policy_type = policy.policy_type();
		let ledger_conn = config.require_str("ledger_conn")?;

		let prepared = self.ledger.prepare_policy(&policy).await?;
		self.ledger.post_policy(&prepared, &ledger_conn).await?;

		// The insert can succeed before the record is visible to queries.
		match self.ledger.get_policy(policy_type, selector).await? {
			PolicyLookup::Found(declared) => {
				info!("confirmed {} policy {} on ledger", policy_type, declared.id);
				Ok(declared.id)
			}
			PolicyLookup::NotFound => Err(ReconcileError::LedgerInconsistent {
				policy_type,
				selector: selector.to_where_clause(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::json;

	use crate::executor::testing::MockNode;

	use super::*;

	fn reconciler(node: &Arc<MockNode>) -> PolicyReconciler {
		let executor: Arc<dyn crate::executor::CommandExecutor> = node.clone();
		PolicyReconciler::new(LedgerClient::new(executor.clone()), Geolocator::new(executor))
	}

	fn cluster_config() -> Configuration {
		let file: indexmap::IndexMap<String, String> = [
			("cluster_name", "c1"),
			("company_name", "Acme"),
			("default_dbms", "db1"),
			("ledger_conn", "127.0.0.1:32048"),
		]
		.into_iter()
		.map(|(key, value)| (key.to_string(), value.to_string()))
		.collect();
		Configuration::resolve(&file, &indexmap::IndexMap::new())
	}

	#[tokio::test]
	async fn declaring_twice_produces_one_record() {
		let node = Arc::new(MockNode::new());
		let policies = reconciler(&node);
		let config = cluster_config();

		let first = policies.ensure_cluster(&config).await.expect("first declaration");
		node.clear_commands();
		let second = policies.ensure_cluster(&config).await.expect("second declaration");

		assert_eq!(first, second);
		assert_eq!(node.ledger_count("cluster"), 1);
		assert_eq!(node.commands_matching("blockchain prepare"), 0);
		assert_eq!(node.commands_matching("blockchain insert"), 0);
	}

	#[tokio::test]
	async fn existing_policy_is_reused_despite_extra_fields() {
		let node = Arc::new(MockNode::new());
		let id = node.seed_policy("cluster", json!({ "name": "c1", "company": "Acme", "status": "active" }));
		let policies = reconciler(&node);

		let found = policies.ensure_cluster(&cluster_config()).await.expect("lookup succeeds");

		assert_eq!(found, id);
		assert_eq!(node.ledger_count("cluster"), 1);
	}

	#[tokio::test]
	async fn invisible_insert_is_reported_as_inconsistent() {
		let node = Arc::new(MockNode::new());
		node.swallow_inserts();
		let policies = reconciler(&node);

		let error = policies
			.ensure_cluster(&cluster_config())
			.await
			.expect_err("confirmation comes back empty");

		assert!(matches!(error, ReconcileError::LedgerInconsistent { .. }));
	}

	#[tokio::test]
	async fn missing_required_key_names_the_key() {
		let node = Arc::new(MockNode::new());
		let policies = reconciler(&node);
		let config = Configuration::default();

		let error = policies
			.ensure_node_policy(PolicyType::Operator, &config, None)
			.await
			.expect_err("configuration is empty");

		assert!(matches!(error, ReconcileError::ConfigMissing(key) if key == "node_name"));
	}
}
