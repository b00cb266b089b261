//! Background process activation.
//!
//! Every ensure step follows the same shape: poll the process table, issue
//! the run command only when the process is absent, then re-poll once. One
//! activation attempt and one confirmation, never a retry loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::executor::{CommandError, CommandExecutor, CommandOutcome};

const SCHEDULER: &str = "Scheduler";
const BLOCKCHAIN_SYNC: &str = "Blockchain Sync";
const OPERATOR: &str = "Operator";
const PUBLISHER: &str = "Publisher";
const STREAMER: &str = "Streamer";

/// Snapshot of the node's process table.
#[derive(Debug, Clone, Default)]
pub struct ProcessStatus {
	entries: BTreeMap<String, ProcessEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessEntry {
	#[serde(rename = "Status", default)]
	pub status: String,
	#[serde(rename = "Details", default)]
	pub details: String,
}

impl ProcessStatus {
	/// Parse the body of `get processes where format=json`.
	pub fn from_outcome(outcome: &CommandOutcome) -> Result<Self, CommandError> {
		let Some(value) = outcome.as_json() else {
			return Err(CommandError::Malformed(format!(
				"process table is not a JSON object: {}",
				outcome.to_text()
			)));
		};
		let entries: BTreeMap<String, ProcessEntry> = serde_json::from_value(value.clone())
			.map_err(|error| CommandError::Malformed(format!("process table: {error}")))?;
		Ok(Self { entries })
	}

	/// Whether a process is declared at all.
	pub fn is_declared(&self, name: &str) -> bool {
		self.entries
			.get(name)
			.map(|entry| !entry.status.is_empty() && entry.status != "Not declared")
			.unwrap_or(false)
	}

	pub fn details(&self, name: &str) -> Option<&str> {
		self.entries.get(name).map(|entry| entry.details.as_str())
	}

	/// The base scheduler is running when task slot 1 appears in the details.
	pub fn scheduler_task_active(&self) -> bool {
		self.details(SCHEDULER)
			.map(|details| details.contains("[1 (user)]"))
			.unwrap_or(false)
	}
}

/// Parameters for the blockchain-sync process.
#[derive(Debug, Clone)]
pub struct SyncParams {
	pub source: String,
	pub interval: String,
	pub destination: String,
	pub ledger_conn: String,
}

/// Options for the operator ingestion process.
#[derive(Debug, Clone)]
pub struct OperatorOptions {
	pub create_table: bool,
	pub update_tsd_info: bool,
	pub archive: bool,
	pub compress_json: bool,
	pub compress_sql: bool,
	pub threads: i64,
}

impl Default for OperatorOptions {
	fn default() -> Self {
		Self {
			create_table: true,
			update_tsd_info: true,
			archive: true,
			compress_json: true,
			compress_sql: true,
			threads: 3,
		}
	}
}

/// Options for the publisher process.
#[derive(Debug, Clone)]
pub struct PublisherOptions {
	pub dbms_location: String,
	pub table_location: String,
	pub compress_json: bool,
	pub ledger_conn: Option<String>,
}

impl Default for PublisherOptions {
	fn default() -> Self {
		Self {
			dbms_location: "file_name[0]".to_string(),
			table_location: "file_name[1]".to_string(),
			compress_json: true,
			ledger_conn: None,
		}
	}
}

/// Activates the node's background processes.
pub struct ProcessActivator {
	executor: Arc<dyn CommandExecutor>,
}

impl ProcessActivator {
	pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
		Self { executor }
	}

	/// Poll the node's process table.
	pub async fn snapshot(&self) -> Result<ProcessStatus, CommandError> {
		let outcome = self.executor.get("get processes where format=json").await?;
		ProcessStatus::from_outcome(&outcome)
	}

	/// Ensure the base scheduler task is running.
	pub async fn ensure_scheduler_running(&self) -> Result<bool, CommandError> {
		if self.snapshot().await?.scheduler_task_active() {
			debug!("base scheduler already running");
			return Ok(true);
		}
		info!("base scheduler not running, issuing `run scheduler 1`");
		self.executor.post("run scheduler 1", None).await?;
		Ok(self.snapshot().await?.scheduler_task_active())
	}

	/// Ensure the blockchain-sync process pulls the ledger on the configured
	/// cadence.
	pub async fn ensure_sync_running(&self, params: &SyncParams) -> Result<bool, CommandError> {
		if self.snapshot().await?.is_declared(BLOCKCHAIN_SYNC) {
			debug!("blockchain sync already declared");
			return Ok(true);
		}
		let command = format!(
			"run blockchain sync where source={} and time={} and dest={} and connection={}",
			params.source, params.interval, params.destination, params.ledger_conn
		);
		info!("starting blockchain sync against {}", params.ledger_conn);
		self.executor.post(&command, None).await?;
		Ok(self.snapshot().await?.is_declared(BLOCKCHAIN_SYNC))
	}

	/// Ensure the streamer process that flushes buffered data to disk.
	pub async fn ensure_streamer(&self) -> Result<bool, CommandError> {
		if self.snapshot().await?.is_declared(STREAMER) {
			return Ok(true);
		}
		self.executor.post("run streamer", None).await?;
		Ok(self.snapshot().await?.is_declared(STREAMER))
	}

	/// Set the write-buffer flush thresholds.
	pub async fn set_buffer_threshold(
		&self,
		time: &str,
		volume: &str,
		write_immediate: bool,
	) -> Result<(), CommandError> {
		let command = format!(
			"set buffer threshold where time={time} and volume={volume} and write_immediate={write_immediate}"
		);
		self.executor.post(&command, None).await.map(|_| ())
	}

	/// Start the operator ingestion process against the declared policy.
	pub async fn start_operator(&self, policy_id: &str, options: &OperatorOptions) -> Result<bool, CommandError> {
		if self.snapshot().await?.is_declared(OPERATOR) {
			debug!("operator process already declared");
			return Ok(true);
		}
		let command = format!(
			"run operator where policy={policy_id} and create_table={} and update_tsd_info={} and archive={} and compress_json={} and compress_sql={} and threads={}",
			options.create_table,
			options.update_tsd_info,
			options.archive,
			options.compress_json,
			options.compress_sql,
			options.threads
		);
		info!("starting operator for policy {}", policy_id);
		self.executor.post(&command, None).await?;
		Ok(self.snapshot().await?.is_declared(OPERATOR))
	}

	/// Start the publisher process.
	pub async fn start_publisher(&self, options: &PublisherOptions) -> Result<bool, CommandError> {
		if self.snapshot().await?.is_declared(PUBLISHER) {
			debug!("publisher process already declared");
			return Ok(true);
		}
		let mut command = format!(
			"run publisher where dbms_name={} and table_name={} and delete_json=true and compress_json={} and delete_sql=true and compress_sql=false",
			options.dbms_location, options.table_location, options.compress_json
		);
		if let Some(ledger_conn) = &options.ledger_conn {
			command.push_str(&format!(" and master_node={ledger_conn}"));
		}
		info!("starting publisher");
		self.executor.post(&command, None).await?;
		Ok(self.snapshot().await?.is_declared(PUBLISHER))
	}

	/// Whether any partitioning is already declared on the node.
	pub async fn partitions_declared(&self) -> Result<bool, CommandError> {
		match self.executor.get("get partitions").await {
			Ok(outcome) => Ok(!outcome.is_empty() && !outcome.to_text().contains("No partitions")),
			Err(error) if error.is_connectivity() => Err(error),
			Err(_) => Ok(false),
		}
	}

	/// Declare table partitioning plus the daily cleanup task.
	pub async fn configure_partitions(
		&self,
		db: &str,
		table: &str,
		column: &str,
		interval: &str,
		keep: i64,
	) -> Result<(), CommandError> {
		let command = format!("partition {db} {table} using {column} by {interval}");
		self.executor.post(&command, None).await?;
		let task = format!(
			"schedule time=1 day and name=\"Remove Old Partitions\" task drop partition where dbms={db} and table={table} and keep={keep}"
		);
		self.executor.post(&task, None).await.map(|_| ())
	}
}
