//! Logical database provisioning.
//!
//! `connect dbms` can report success while the engine silently refused, so
//! every ensure step re-checks the authoritative `get databases` list. When
//! the configured engine is unreachable the provisioner falls back to the
//! embedded sqlite engine exactly once and reports which tier it landed on;
//! the caller decides whether the lesser engine is acceptable.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::executor::{CommandError, CommandExecutor, CommandOutcome};

const EMBEDDED_ENGINE: &str = "sqlite";

/// Connection settings for a physical database engine.
#[derive(Debug, Clone)]
pub struct DbConnection {
	pub engine: String,
	pub host: Option<String>,
	pub port: Option<i64>,
	pub user: Option<String>,
	pub password: Option<String>,
	pub memory: bool,
}

impl DbConnection {
	/// The embedded engine used when the preferred engine is unreachable.
	pub fn embedded() -> Self {
		Self {
			engine: EMBEDDED_ENGINE.to_string(),
			host: None,
			port: None,
			user: None,
			password: None,
			memory: false,
		}
	}

	/// In-memory embedded engine, used for the query database.
	pub fn in_memory() -> Self {
		Self {
			memory: true,
			..Self::embedded()
		}
	}

	/// Read connection settings from the resolved configuration; the engine
	/// defaults to the embedded one when `db_type` is unset.
	pub fn from_config(config: &Configuration) -> Self {
		let engine = config
			.get_str("db_type")
			.unwrap_or_else(|| EMBEDDED_ENGINE.to_string());
		if engine == EMBEDDED_ENGINE {
			return Self::embedded();
		}
		Self {
			engine,
			host: config.get_str("db_ip"),
			port: config.get_int("db_port"),
			user: config.get_str("db_user"),
			password: config.get_str("db_passwd"),
			memory: false,
		}
	}

	fn connect_command(&self, name: &str) -> String {
		let mut command = format!("connect dbms {name} where type={}", self.engine);
		if let Some(host) = &self.host {
			command.push_str(&format!(" and ip={host}"));
		}
		if let Some(port) = self.port {
			command.push_str(&format!(" and port={port}"));
		}
		if let Some(user) = &self.user {
			command.push_str(&format!(" and user={user}"));
		}
		if let Some(password) = &self.password {
			command.push_str(&format!(" and password={password}"));
		}
		if self.memory {
			command.push_str(" and memory=true");
		}
		command
	}
}

/// Provisions logical databases and their mandatory tables.
pub struct DatabaseProvisioner {
	executor: Arc<dyn CommandExecutor>,
}

impl DatabaseProvisioner {
	pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
		Self { executor }
	}

	/// List the logical databases the node is currently connected to.
	pub async fn connected_databases(&self) -> Result<Vec<String>, CommandError> {
		let outcome = self.executor.get("get databases").await?;
		Ok(parse_database_list(&outcome))
	}

	/// Ensure the named logical database is connected, falling back to the
	/// embedded engine at most once. Returns whether the database ended up
	/// connected; connectivity failures still propagate.
	pub async fn ensure_database(&self, name: &str, connection: &DbConnection) -> Result<bool, CommandError> {
		if self.is_connected(name).await? {
			debug!("logical database {} already connected", name);
			return Ok(true);
		}
		if self.try_connect(name, connection).await? {
			return Ok(true);
		}
		if connection.engine == EMBEDDED_ENGINE {
			// The preferred engine already is the embedded one; there is no
			// lesser tier to fall back to.
			return Ok(false);
		}
		warn!(
			"engine {} unavailable for {}, falling back to {}",
			connection.engine, name, EMBEDDED_ENGINE
		);
		self.try_connect(name, &DbConnection::embedded()).await
	}

	/// Check whether a table exists on a logical database.
	pub async fn table_exists(&self, db: &str, table: &str) -> Result<bool, CommandError> {
		let command = format!("get table local status where dbms={db} and name={table}");
		let outcome = self.executor.get(&command).await?;
		let exists = match &outcome {
			CommandOutcome::Json(value) => value.get("local").and_then(Value::as_str) == Some("true"),
			CommandOutcome::Text(text) => text.contains("true"),
		};
		Ok(exists)
	}

	/// Ensure a table exists. The existence check always runs first; issuing
	/// `create table` against an existing table errors on the duplicate.
	pub async fn ensure_table(&self, db: &str, table: &str) -> Result<bool, CommandError> {
		if self.table_exists(db, table).await? {
			debug!("table {}.{} already exists", db, table);
			return Ok(true);
		}
		let command = format!("create table {table} where dbms={db}");
		match self.executor.post(&command, None).await {
			Ok(_) => {
				info!("created table {}.{}", db, table);
				Ok(true)
			}
			Err(error) if error.is_connectivity() => Err(error),
			Err(error) => {
				warn!("create table {}.{} failed: {}", db, table, error);
				Ok(false)
			}
		}
	}

	async fn is_connected(&self, name: &str) -> Result<bool, CommandError> {
		Ok(self.connected_databases().await?.iter().any(|db| db == name))
	}

	async fn try_connect(&self, name: &str, connection: &DbConnection) -> Result<bool, CommandError> {
		match self.executor.post(&connection.connect_command(name), None).await {
			Ok(_) => {}
			Err(error) if error.is_connectivity() => return Err(error),
			Err(error) => {
				warn!("connect dbms {} via {} failed: {}", name, connection.engine, error);
				return Ok(false);
			}
		}
		let connected = self.is_connected(name).await?;
		if connected {
			info!("connected logical database {} via {}", name, connection.engine);
		}
		Ok(connected)
	}
}

fn parse_database_list(outcome: &CommandOutcome) -> Vec<String> {
	match outcome {
		CommandOutcome::Json(Value::Array(items)) => items
			.iter()
			.filter_map(Value::as_str)
			.map(str::to_string)
			.collect(),
		CommandOutcome::Json(value) => value
			.as_object()
			.map(|map| map.keys().cloned().collect())
			.unwrap_or_default(),
		// The text rendering is a table; collecting every token still lets
		// exact-name membership checks work.
		CommandOutcome::Text(text) => text.split_whitespace().map(str::to_string).collect(),
	}
}
