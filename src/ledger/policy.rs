//! Policy model: local candidates, ledger-resident declarations and the
//! selectors that decide whether an equivalent policy already exists.

use std::fmt;

use serde_json::{Map, Value, json};

/// Ledger policy types the reconciler declares or reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyType {
	Master,
	Cluster,
	Operator,
	Publisher,
	Query,
}

impl PolicyType {
	pub fn as_str(&self) -> &'static str {
		match self {
			PolicyType::Master => "master",
			PolicyType::Cluster => "cluster",
			PolicyType::Operator => "operator",
			PolicyType::Publisher => "publisher",
			PolicyType::Query => "query",
		}
	}
}

impl fmt::Display for PolicyType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Stable field subset identifying "an equivalent policy already exists".
///
/// The ledger id is not known before declaration, so idempotency keys off
/// these fields instead. A selector matching several records yields the
/// first one returned; callers choose selectors unique in practice.
#[derive(Debug, Clone, Default)]
pub struct Selector {
	fields: Vec<(String, String)>,
}

impl Selector {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn field(mut self, key: &str, value: impl fmt::Display) -> Self {
		self.fields.push((key.to_string(), value.to_string()));
		self
	}

	/// Render as the `where` clause of a `blockchain get` command; values
	/// containing spaces are quoted.
	pub fn to_where_clause(&self) -> String {
		let mut clause = String::new();
		for (index, (key, value)) in self.fields.iter().enumerate() {
			if index > 0 {
				clause.push_str(" and ");
			}
			if value.contains(' ') {
				clause.push_str(&format!("{key}=\"{value}\""));
			} else {
				clause.push_str(&format!("{key}={value}"));
			}
		}
		clause
	}
}

/// A locally built, not yet declared policy.
#[derive(Debug, Clone)]
pub struct NewPolicy {
	policy_type: PolicyType,
	fields: Map<String, Value>,
}

impl NewPolicy {
	pub fn new(policy_type: PolicyType) -> Self {
		Self {
			policy_type,
			fields: Map::new(),
		}
	}

	pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.fields.insert(key.to_string(), value.into());
		self
	}

	pub fn with_optional(self, key: &str, value: Option<impl Into<Value>>) -> Self {
		match value {
			Some(value) => self.with_field(key, value),
			None => self,
		}
	}

	pub fn policy_type(&self) -> PolicyType {
		self.policy_type
	}

	/// Serialize as the single-key object the ledger expects.
	pub fn to_payload(&self) -> String {
		json!({ self.policy_type.as_str(): self.fields }).to_string()
	}
}

/// Attributes of a node policy payload (master, operator, publisher, query).
#[derive(Debug, Clone, Default)]
pub struct NodePolicySpec {
	pub name: String,
	pub company: String,
	pub hostname: Option<String>,
	pub external_ip: String,
	pub local_ip: String,
	pub server_port: i64,
	pub rest_port: i64,
	pub broker_port: Option<i64>,
	pub cluster_id: Option<String>,
	pub member: Option<i64>,
	pub location: Option<String>,
	pub country: Option<String>,
	pub state: Option<String>,
	pub city: Option<String>,
}

impl NodePolicySpec {
	/// Build the payload for the given node policy type. Cluster membership
	/// only applies to operator policies.
	pub fn into_policy(self, policy_type: PolicyType) -> NewPolicy {
		let mut policy = NewPolicy::new(policy_type)
			.with_field("name", self.name)
			.with_field("company", self.company)
			.with_optional("hostname", self.hostname)
			.with_field("ip", self.external_ip)
			.with_field("local_ip", self.local_ip)
			.with_field("port", self.server_port)
			.with_field("rest_port", self.rest_port)
			.with_optional("broker_port", self.broker_port);
		if policy_type == PolicyType::Operator {
			policy = policy
				.with_optional("cluster", self.cluster_id)
				.with_optional("member", self.member);
		}
		policy
			.with_optional("loc", self.location)
			.with_optional("country", self.country)
			.with_optional("state", self.state)
			.with_optional("city", self.city)
	}

	/// Selector for this node: name, company, external IP and TCP port.
	pub fn selector(&self) -> Selector {
		Selector::new()
			.field("name", &self.name)
			.field("company", &self.company)
			.field("ip", &self.external_ip)
			.field("port", self.server_port)
	}
}

/// Cluster policy payload; `dbms` is carried when the cluster is tied to a
/// default database.
pub fn cluster_policy(name: &str, company: &str, dbms: Option<&str>) -> NewPolicy {
	NewPolicy::new(PolicyType::Cluster)
		.with_field("name", name)
		.with_field("company", company)
		.with_optional("dbms", dbms)
}

/// Selector for a cluster: name and company.
pub fn cluster_selector(name: &str, company: &str) -> Selector {
	Selector::new().field("name", name).field("company", company)
}

/// A policy as read back from the ledger, with its assigned identity.
#[derive(Debug, Clone)]
pub struct DeclaredPolicy {
	pub id: String,
	pub date: Option<String>,
	pub fields: Map<String, Value>,
}

impl DeclaredPolicy {
	/// Parse a single ledger record of the expected type. Returns `None`
	/// when the record is of another type or carries no id.
	pub fn from_record(policy_type: PolicyType, record: &Value) -> Option<Self> {
		let fields = record.get(policy_type.as_str())?.as_object()?;
		let id = fields.get("id")?.as_str()?.to_string();
		let date = fields.get("date").and_then(Value::as_str).map(str::to_string);
		Some(Self {
			id,
			date,
			fields: fields.clone(),
		})
	}
}
