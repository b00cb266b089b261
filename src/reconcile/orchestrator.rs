//! Top-level reconciliation state machine.
//!
//! One run drives a node through the ordered states
//! start -> config_resolved -> databases_ready -> scheduler_ready ->
//! [cluster_declared] -> node_policy_declared -> service_started -> done.
//! Every check-then-act step re-queries live state first, so any number of
//! sequential runs against the same target converge without duplicating
//! ledger records. An interrupted run leaves the node at the last completed
//! state; re-running from the top is the recovery procedure.

use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ConfigValue, Configuration};
use crate::executor::CommandExecutor;
use crate::ledger::{LedgerClient, PolicyType};
use crate::node::{
	DatabaseProvisioner, DbConnection, Geolocator, OperatorOptions, ProcessActivator,
	PublisherOptions, SyncParams,
};

use super::policies::PolicyReconciler;
use super::types::{NodeRole, ReconcileError, ReconcileFailure, ReconcileState};

/// Drives one node from an arbitrary partial state to `done`.
pub struct NodeReconciler {
	executor: Arc<dyn CommandExecutor>,
	file_config: IndexMap<String, String>,
	databases: DatabaseProvisioner,
	processes: ProcessActivator,
	policies: PolicyReconciler,
	run_guard: tokio::sync::Mutex<()>,
}

impl NodeReconciler {
	pub fn new(executor: Arc<dyn CommandExecutor>, file_config: IndexMap<String, String>) -> Self {
		let databases = DatabaseProvisioner::new(executor.clone());
		let processes = ProcessActivator::new(executor.clone());
		let ledger = LedgerClient::new(executor.clone());
		let geolocator = Geolocator::new(executor.clone());
		Self {
			executor,
			file_config,
			databases,
			processes,
			policies: PolicyReconciler::new(ledger, geolocator),
			run_guard: tokio::sync::Mutex::new(()),
		}
	}

	/// Execute one reconciliation run to completion or first failure.
	pub async fn run(&self) -> Result<(), ReconcileFailure> {
		let Ok(_guard) = self.run_guard.try_lock() else {
			return Err(ReconcileFailure {
				state: ReconcileState::Start,
				error: ReconcileError::AlreadyInProgress,
			});
		};

		let config = self
			.resolve_config()
			.await
			.map_err(at(ReconcileState::ConfigResolved))?;
		let role = self.node_role(&config).map_err(at(ReconcileState::ConfigResolved))?;
		info!(
			"reconciling {} node `{}`",
			role,
			config.get_str("node_name").unwrap_or_default()
		);

		self.provision_databases(role, &config)
			.await
			.map_err(at(ReconcileState::DatabasesReady))?;
		self.activate_processes(role, &config)
			.await
			.map_err(at(ReconcileState::SchedulerReady))?;

		let cluster_id = if role.declares_cluster() {
			let id = self
				.policies
				.ensure_cluster(&config)
				.await
				.map_err(at(ReconcileState::ClusterDeclared))?;
			Some(id)
		} else {
			None
		};

		let policy_id = self
			.declare_node_policies(role, &config, cluster_id.as_deref())
			.await
			.map_err(at(ReconcileState::NodePolicyDeclared))?;
		self.start_services(role, &config, &policy_id)
			.await
			.map_err(at(ReconcileState::ServiceStarted))?;

		info!("{} node reached {}", role, ReconcileState::Done);
		Ok(())
	}

	/// Resolve the authoritative configuration: file source merged over the
	/// node's live dictionary, file wins on conflict.
	async fn resolve_config(&self) -> Result<Configuration, ReconcileError> {
		let remote = self.remote_dictionary().await?;
		let mut config = Configuration::resolve(&self.file_config, &remote);
		if config.is_empty() {
			return Err(ReconcileError::ConfigMissing(
				"node_type (no configuration from file or node)".to_string(),
			));
		}
		if config.get_str("hostname").is_none() {
			if let Some(hostname) = self.node_hostname().await {
				config.insert("hostname", ConfigValue::Text(hostname));
			}
		}
		Ok(config)
	}

	async fn remote_dictionary(&self) -> Result<IndexMap<String, String>, ReconcileError> {
		let outcome = self.executor.get("get dictionary where format=json").await?;
		let mut dictionary = IndexMap::new();
		if let Some(map) = outcome.as_json().and_then(Value::as_object) {
			for (key, value) in map {
				let rendered = match value {
					Value::String(text) => text.clone(),
					other => other.to_string(),
				};
				dictionary.insert(key.clone(), rendered);
			}
		} else {
			warn!("node dictionary was not JSON; continuing with the file source only");
		}
		Ok(dictionary)
	}

	async fn node_hostname(&self) -> Option<String> {
		match self.executor.get("get hostname").await {
			Ok(outcome) => {
				let hostname = outcome.to_text().trim().trim_matches('"').to_string();
				(!hostname.is_empty()).then_some(hostname)
			}
			Err(error) => {
				warn!("failed to read hostname from node: {}", error);
				None
			}
		}
	}

	fn node_role(&self, config: &Configuration) -> Result<NodeRole, ReconcileError> {
		let raw = config.require_str("node_type")?;
		NodeRole::from_str(&raw).map_err(|value| ReconcileError::ConfigInvalid {
			key: "node_type".to_string(),
			value,
		})
	}

	/// Connect the logical databases the role depends on and create their
	/// mandatory tables.
	async fn provision_databases(&self, role: NodeRole, config: &Configuration) -> Result<(), ReconcileError> {
		let connection = DbConnection::from_config(config);

		if role.hosts_ledger() {
			if !self.databases.ensure_database("blockchain", &connection).await? {
				return Err(ReconcileError::Connectivity(
					"could not connect logical database `blockchain`".to_string(),
				));
			}
			if !self.databases.ensure_table("blockchain", "ledger").await? {
				return Err(ReconcileError::Connectivity(
					"could not create table blockchain.ledger".to_string(),
				));
			}
		}

		if role.ingests_data() {
			let default_dbms = config.require_str("default_dbms")?;
			if !self.databases.ensure_database(&default_dbms, &connection).await? {
				return Err(ReconcileError::Connectivity(format!(
					"could not connect logical database `{default_dbms}`"
				)));
			}
		}

		if role.ingests_data() || role.publishes_data() {
			if !self.databases.ensure_database("almgm", &connection).await? {
				return Err(ReconcileError::Connectivity(
					"could not connect logical database `almgm`".to_string(),
				));
			}
			if !self.databases.ensure_table("almgm", "tsd_info").await? {
				return Err(ReconcileError::Connectivity(
					"could not create table almgm.tsd_info".to_string(),
				));
			}
		}

		if role == NodeRole::Query || config.get_bool("system_query").unwrap_or(false) {
			// system_query always lives on the embedded engine; losing it is
			// survivable for every role except the one serving queries.
			let embedded = if config.get_bool("memory").unwrap_or(false) {
				DbConnection::in_memory()
			} else {
				DbConnection::embedded()
			};
			let connected = self.databases.ensure_database("system_query", &embedded).await?;
			if !connected && role == NodeRole::Query {
				return Err(ReconcileError::Connectivity(
					"could not connect logical database `system_query`".to_string(),
				));
			}
		}
		Ok(())
	}

	/// Base scheduler for every role; blockchain sync now for roles that pull
	/// the ledger from a remote master. Ledger-hosting roles sync against
	/// their own ledger once services start.
	async fn activate_processes(&self, role: NodeRole, config: &Configuration) -> Result<(), ReconcileError> {
		if !self.processes.ensure_scheduler_running().await? {
			return Err(ReconcileError::Connectivity("scheduler task 1 did not start".to_string()));
		}
		if !role.hosts_ledger() {
			self.ensure_sync(config).await?;
		}
		Ok(())
	}

	async fn ensure_sync(&self, config: &Configuration) -> Result<(), ReconcileError> {
		let params = SyncParams {
			source: config.require_str("blockchain_source")?,
			interval: config.require_str("sync_time")?,
			destination: config.require_str("blockchain_destination")?,
			ledger_conn: config.require_str("ledger_conn")?,
		};
		if !self.processes.ensure_sync_running(&params).await? {
			return Err(ReconcileError::Connectivity("blockchain sync did not start".to_string()));
		}
		Ok(())
	}

	/// Standalone roles host the ledger themselves, so they declare the
	/// master policy alongside their worker policy.
	async fn declare_node_policies(
		&self,
		role: NodeRole,
		config: &Configuration,
		cluster_id: Option<&str>,
	) -> Result<String, ReconcileError> {
		if matches!(role, NodeRole::Standalone | NodeRole::StandalonePublisher) {
			self.policies
				.ensure_node_policy(PolicyType::Master, config, None)
				.await?;
		}
		self.policies
			.ensure_node_policy(role.policy_type(), config, cluster_id)
			.await
	}

	async fn start_services(
		&self,
		role: NodeRole,
		config: &Configuration,
		policy_id: &str,
	) -> Result<(), ReconcileError> {
		if role.hosts_ledger() {
			self.ensure_sync(config).await?;
		}
		if role.ingests_data() {
			self.configure_partitions(config).await;
			self.prepare_streaming(config).await;
			if !self.processes.start_operator(policy_id, &OperatorOptions::default()).await? {
				return Err(ReconcileError::Connectivity("operator process did not start".to_string()));
			}
		}
		if role.publishes_data() {
			self.prepare_streaming(config).await;
			let options = PublisherOptions {
				compress_json: config.get_bool("compress_file").unwrap_or(true),
				ledger_conn: config.get_str("ledger_conn"),
				..PublisherOptions::default()
			};
			if !self.processes.start_publisher(&options).await? {
				return Err(ReconcileError::Connectivity("publisher process did not start".to_string()));
			}
		}
		Ok(())
	}

	/// Partitioning is best-effort; a node without partitions still ingests.
	async fn configure_partitions(&self, config: &Configuration) {
		if !config.get_bool("enable_partitions").unwrap_or(false) {
			return;
		}
		match self.processes.partitions_declared().await {
			Ok(true) => return,
			Ok(false) => {}
			Err(error) => {
				warn!("could not inspect partitions: {}", error);
				return;
			}
		}
		let Some(db) = config.get_str("default_dbms") else {
			warn!("enable_partitions is set but default_dbms is missing");
			return;
		};
		let table = config.get_str("partition_table").unwrap_or_else(|| "*".to_string());
		let column = config
			.get_str("partition_column")
			.unwrap_or_else(|| "insert_timestamp".to_string());
		let interval = config
			.get_str("partition_interval")
			.unwrap_or_else(|| "14 days".to_string());
		let keep = config.get_int("partition_keep").unwrap_or(3);
		if let Err(error) = self
			.processes
			.configure_partitions(&db, &table, &column, &interval, keep)
			.await
		{
			warn!("failed to configure partitions on {}: {}", db, error);
		}
	}

	/// Buffer thresholds and the streamer are advisory for ingestion.
	async fn prepare_streaming(&self, config: &Configuration) {
		let time = config
			.get_str("threshold_time")
			.unwrap_or_else(|| "60 seconds".to_string());
		let volume = config
			.get_str("threshold_volume")
			.unwrap_or_else(|| "10KB".to_string());
		let write_immediate = config.get_bool("write_immediate").unwrap_or(false);
		if let Err(error) = self.processes.set_buffer_threshold(&time, &volume, write_immediate).await {
			warn!("failed to set buffer threshold: {}", error);
		}
		match self.processes.ensure_streamer().await {
			Ok(true) => {}
			Ok(false) => warn!("streamer process did not start"),
			Err(error) => warn!("failed to start streamer: {}", error),
		}
	}
}

fn at(state: ReconcileState) -> impl Fn(ReconcileError) -> ReconcileFailure {
	move |error| ReconcileFailure { state, error }
}
