//! Scripted stand-in for a node and the ledger behind it.
//!
//! [`MockNode`] serves the command surface the reconciler uses, keeps the
//! node-side state (dictionary, databases, processes) and the ledger records
//! in memory, and records every command issued against it so tests can assert
//! on what was attempted, not only on the end state.

use std::collections::BTreeSet;
use std::sync::Mutex;

use indexmap::IndexMap;
use serde_json::{Value, json};

use super::{CommandError, CommandExecutor, CommandOutcome};

pub struct MockNode {
	inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
	dictionary: IndexMap<String, String>,
	databases: BTreeSet<String>,
	tables: BTreeSet<(String, String)>,
	running: BTreeSet<String>,
	scheduler_user_task: bool,
	partitioned: BTreeSet<String>,
	ledger: Vec<Value>,
	commands: Vec<String>,
	next_policy_id: u64,
	failing_engines: BTreeSet<String>,
	insert_failures: u32,
	swallow_inserts: bool,
}

impl MockNode {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(MockState {
				next_policy_id: 1,
				..MockState::default()
			}),
		}
	}

	/// A node whose dictionary already carries the ledger connection and the
	/// sync cadence, as a provisioned node image would.
	pub fn with_sync_defaults() -> Self {
		let node = Self::new();
		node.set_dictionary("ledger_conn", "127.0.0.1:32048");
		node.set_dictionary("blockchain_source", "master");
		node.set_dictionary("sync_time", "30 seconds");
		node.set_dictionary("blockchain_destination", "file");
		node
	}

	pub fn set_dictionary(&self, key: &str, value: &str) {
		self.lock().dictionary.insert(key.to_string(), value.to_string());
	}

	pub fn add_database(&self, name: &str) {
		self.lock().databases.insert(name.to_string());
	}

	pub fn add_table(&self, db: &str, table: &str) {
		self.lock().tables.insert((db.to_string(), table.to_string()));
	}

	/// Refuse every `connect dbms` attempt against the given engine type.
	pub fn fail_engine(&self, engine: &str) {
		self.lock().failing_engines.insert(engine.to_string());
	}

	/// Reject the next `count` `blockchain insert` calls.
	pub fn fail_inserts(&self, count: u32) {
		self.lock().insert_failures = count;
	}

	/// Accept inserts but never surface the records to queries.
	pub fn swallow_inserts(&self) {
		self.lock().swallow_inserts = true;
	}

	pub fn seed_policy(&self, policy_type: &str, mut fields: Value) -> String {
		let mut state = self.lock();
		let id = format!("{:032x}", state.next_policy_id);
		state.next_policy_id += 1;
		if let Some(map) = fields.as_object_mut() {
			map.insert("id".to_string(), Value::String(id.clone()));
			map.insert("date".to_string(), Value::String("2026-08-30T00:00:00Z".to_string()));
		}
		state.ledger.push(json!({ policy_type: fields }));
		id
	}

	pub fn commands(&self) -> Vec<String> {
		self.lock().commands.clone()
	}

	pub fn commands_matching(&self, needle: &str) -> usize {
		self.lock()
			.commands
			.iter()
			.filter(|command| command.contains(needle))
			.count()
	}

	pub fn clear_commands(&self) {
		self.lock().commands.clear();
	}

	pub fn ledger_records(&self) -> Vec<Value> {
		self.lock().ledger.clone()
	}

	pub fn ledger_count(&self, policy_type: &str) -> usize {
		self.lock()
			.ledger
			.iter()
			.filter(|record| record.get(policy_type).is_some())
			.count()
	}

	pub fn is_running(&self, process: &str) -> bool {
		self.lock().running.contains(process)
	}

	pub fn has_database(&self, name: &str) -> bool {
		self.lock().databases.contains(name)
	}

	pub fn has_table(&self, db: &str, table: &str) -> bool {
		self.lock().tables.contains(&(db.to_string(), table.to_string()))
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
		self.inner.lock().expect("mock state poisoned")
	}
}

impl Default for MockNode {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait::async_trait]
impl CommandExecutor for MockNode {
	async fn get(&self, command: &str) -> Result<CommandOutcome, CommandError> {
		let mut state = self.lock();
		state.commands.push(command.to_string());
		handle_get(&state, command)
	}

	async fn post(&self, command: &str, payload: Option<&str>) -> Result<CommandOutcome, CommandError> {
		let mut state = self.lock();
		state.commands.push(command.to_string());
		handle_post(&mut state, command, payload)
	}
}

fn handle_get(state: &MockState, command: &str) -> Result<CommandOutcome, CommandError> {
	if command == "get dictionary where format=json" {
		let map: serde_json::Map<String, Value> = state
			.dictionary
			.iter()
			.map(|(key, value)| (key.clone(), Value::String(value.clone())))
			.collect();
		return Ok(CommandOutcome::Json(Value::Object(map)));
	}
	if command == "get hostname" {
		return Ok(CommandOutcome::Text("mock-node".to_string()));
	}
	if command == "get databases" {
		let names: Vec<Value> = state
			.databases
			.iter()
			.map(|name| Value::String(name.clone()))
			.collect();
		return Ok(CommandOutcome::Json(Value::Array(names)));
	}
	if command == "get processes where format=json" {
		return Ok(CommandOutcome::Json(process_table(state)));
	}
	if command == "get partitions" {
		let body = if state.partitioned.is_empty() {
			"No partitions declared"
		} else {
			"Partitions declared"
		};
		return Ok(CommandOutcome::Text(body.to_string()));
	}
	if let Some(rest) = command.strip_prefix("get table local status where ") {
		let fields = parse_pairs(rest);
		let db = fields.get("dbms").cloned().unwrap_or_default();
		let table = fields.get("name").cloned().unwrap_or_default();
		let exists = state.tables.contains(&(db, table));
		return Ok(CommandOutcome::Json(json!({ "local": exists.to_string() })));
	}
	if let Some(rest) = command.strip_prefix("blockchain get ") {
		return Ok(CommandOutcome::Json(query_ledger(state, rest)));
	}
	Ok(CommandOutcome::Text(String::new()))
}

fn handle_post(
	state: &mut MockState,
	command: &str,
	payload: Option<&str>,
) -> Result<CommandOutcome, CommandError> {
	if command == "blockchain prepare policy !new_policy" {
		let raw = payload.ok_or_else(|| CommandError::Rejected {
			command: command.to_string(),
			detail: "missing policy payload".to_string(),
		})?;
		let mut policy: Value = serde_json::from_str(raw).map_err(|error| CommandError::Rejected {
			command: command.to_string(),
			detail: error.to_string(),
		})?;
		let id = format!("{:032x}", state.next_policy_id);
		state.next_policy_id += 1;
		if let Some(fields) = policy
			.as_object_mut()
			.and_then(|map| map.values_mut().next())
			.and_then(Value::as_object_mut)
		{
			fields.insert("id".to_string(), Value::String(id));
			fields.insert("date".to_string(), Value::String("2026-08-30T00:00:00Z".to_string()));
		}
		state
			.dictionary
			.insert("new_policy".to_string(), policy.to_string());
		return Ok(CommandOutcome::Text(String::new()));
	}
	if command.starts_with("blockchain insert") {
		if state.insert_failures > 0 {
			state.insert_failures -= 1;
			return Err(CommandError::Rejected {
				command: command.to_string(),
				detail: "ledger refused the insert".to_string(),
			});
		}
		let staged = state.dictionary.get("new_policy").cloned().ok_or_else(|| {
			CommandError::Rejected {
				command: command.to_string(),
				detail: "no staged policy".to_string(),
			}
		})?;
		if !state.swallow_inserts {
			if let Ok(policy) = serde_json::from_str::<Value>(&staged) {
				state.ledger.push(policy);
			}
		}
		return Ok(CommandOutcome::Text(String::new()));
	}
	if let Some(rest) = command.strip_prefix("connect dbms ") {
		let (name, clause) = rest.split_once(" where ").unwrap_or((rest, ""));
		let fields = parse_pairs(clause);
		let engine = fields.get("type").cloned().unwrap_or_default();
		if state.failing_engines.contains(&engine) {
			return Err(CommandError::Rejected {
				command: command.to_string(),
				detail: format!("engine {engine} refused the connection"),
			});
		}
		state.databases.insert(name.to_string());
		return Ok(CommandOutcome::Text(String::new()));
	}
	if let Some(rest) = command.strip_prefix("create table ") {
		let (table, clause) = rest.split_once(" where ").unwrap_or((rest, ""));
		let fields = parse_pairs(clause);
		let db = fields.get("dbms").cloned().unwrap_or_default();
		let key = (db, table.to_string());
		if state.tables.contains(&key) {
			return Err(CommandError::Rejected {
				command: command.to_string(),
				detail: "table already declared".to_string(),
			});
		}
		state.tables.insert(key);
		return Ok(CommandOutcome::Text(String::new()));
	}
	if command == "run scheduler 1" {
		state.scheduler_user_task = true;
		return Ok(CommandOutcome::Text(String::new()));
	}
	if command.starts_with("run blockchain sync") {
		state.running.insert("Blockchain Sync".to_string());
		return Ok(CommandOutcome::Text(String::new()));
	}
	if command.starts_with("run operator") {
		state.running.insert("Operator".to_string());
		return Ok(CommandOutcome::Text(String::new()));
	}
	if command.starts_with("run publisher") {
		state.running.insert("Publisher".to_string());
		return Ok(CommandOutcome::Text(String::new()));
	}
	if command == "run streamer" {
		state.running.insert("Streamer".to_string());
		return Ok(CommandOutcome::Text(String::new()));
	}
	if let Some(rest) = command.strip_prefix("partition ") {
		if let Some(db) = rest.split_whitespace().next() {
			state.partitioned.insert(db.to_string());
		}
		return Ok(CommandOutcome::Text(String::new()));
	}
	if command.starts_with("location_info =") {
		state.dictionary.insert(
			"location_info".to_string(),
			json!({ "loc": "37.3861,-122.0839", "country": "US", "region": "California", "city": "Mountain View" })
				.to_string(),
		);
		return Ok(CommandOutcome::Text(String::new()));
	}
	// set buffer threshold, schedule tasks and similar accept-and-forget
	// commands answer with an empty body.
	Ok(CommandOutcome::Text(String::new()))
}

fn process_table(state: &MockState) -> Value {
	let scheduler_details = if state.scheduler_user_task {
		"Schedulers IDs in use : [0 (system)] [1 (user)]"
	} else {
		"Schedulers IDs in use : [0 (system)]"
	};
	let status = |name: &str| {
		if state.running.contains(name) { "Running" } else { "Not declared" }
	};
	json!({
		"TCP": { "Status": "Running", "Details": "Listening on: 127.0.0.1:32148" },
		"REST": { "Status": "Running", "Details": "Listening on: 127.0.0.1:32149" },
		"Scheduler": { "Status": "Running", "Details": scheduler_details },
		"Blockchain Sync": { "Status": status("Blockchain Sync"), "Details": "" },
		"Operator": { "Status": status("Operator"), "Details": "" },
		"Publisher": { "Status": status("Publisher"), "Details": "" },
		"Streamer": { "Status": status("Streamer"), "Details": "" },
	})
}

/// Query ledger records: `<type> where k=v and k2="v 2"`.
fn query_ledger(state: &MockState, query: &str) -> Value {
	let (policy_type, clause) = query.split_once(" where ").unwrap_or((query, ""));
	let filters = parse_pairs(clause);
	let matches: Vec<Value> = state
		.ledger
		.iter()
		.filter(|record| {
			let Some(fields) = record.get(policy_type.trim()) else {
				return false;
			};
			filters.iter().all(|(key, value)| {
				match fields.get(key) {
					Some(Value::String(text)) => text == value,
					Some(other) => other.to_string() == *value,
					None => false,
				}
			})
		})
		.cloned()
		.collect();
	Value::Array(matches)
}

/// Parse `k=v and k2="v 2"` pairs, stripping quotes around values.
fn parse_pairs(clause: &str) -> IndexMap<String, String> {
	let mut pairs = IndexMap::new();
	for part in clause.split(" and ") {
		if let Some((key, value)) = part.split_once('=') {
			pairs.insert(
				key.trim().to_string(),
				value.trim().trim_matches('"').to_string(),
			);
		}
	}
	pairs
}
