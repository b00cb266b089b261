//! Configuration resolution.
//!
//! The file source is merged over the node's live dictionary into one
//! authoritative, typed map that every later stage reads from. The merge is
//! pure; fetching the remote dictionary is the caller's job.

use std::fmt;

use indexmap::IndexMap;

/// A configuration value after coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
	Bool(bool),
	Int(i64),
	Text(String),
}

impl ConfigValue {
	/// Coerce a raw string: case-insensitive `"true"`/`"false"` become
	/// booleans, integer-parseable values become integers, everything else
	/// stays text.
	pub fn coerce(raw: &str) -> Self {
		let trimmed = raw.trim();
		if trimmed.eq_ignore_ascii_case("true") {
			return ConfigValue::Bool(true);
		}
		if trimmed.eq_ignore_ascii_case("false") {
			return ConfigValue::Bool(false);
		}
		if let Ok(number) = trimmed.parse::<i64>() {
			return ConfigValue::Int(number);
		}
		ConfigValue::Text(trimmed.to_string())
	}
}

impl fmt::Display for ConfigValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigValue::Bool(flag) => write!(f, "{flag}"),
			ConfigValue::Int(number) => write!(f, "{number}"),
			ConfigValue::Text(text) => write!(f, "{text}"),
		}
	}
}

/// A required configuration key was absent. Terminal, never retried.
#[derive(Debug, thiserror::Error)]
#[error("missing required configuration key: {0}")]
pub struct MissingKey(pub String);

/// Ordered, typed configuration shared by all reconciliation stages.
///
/// Keys are lower-cased on the way in; insertion order is preserved so
/// diagnostics list keys the way the sources declared them.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
	values: IndexMap<String, ConfigValue>,
}

impl Configuration {
	/// Merge the file source over the node's live dictionary. File values win
	/// on conflict; remote-only keys are imported; unknown keys pass through.
	pub fn resolve(
		file_config: &IndexMap<String, String>,
		remote_config: &IndexMap<String, String>,
	) -> Self {
		let mut values = IndexMap::new();
		for (key, value) in file_config {
			values.insert(key.to_lowercase(), ConfigValue::coerce(value));
		}
		for (key, value) in remote_config {
			let key = key.to_lowercase();
			if !values.contains_key(&key) {
				values.insert(key, ConfigValue::coerce(value));
			}
		}
		Self { values }
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	pub fn insert(&mut self, key: &str, value: ConfigValue) {
		self.values.insert(key.to_lowercase(), value);
	}

	pub fn get_str(&self, key: &str) -> Option<String> {
		self.values.get(key).map(ConfigValue::to_string)
	}

	pub fn get_int(&self, key: &str) -> Option<i64> {
		match self.values.get(key)? {
			ConfigValue::Int(number) => Some(*number),
			ConfigValue::Text(text) => text.parse().ok(),
			ConfigValue::Bool(_) => None,
		}
	}

	pub fn get_bool(&self, key: &str) -> Option<bool> {
		match self.values.get(key)? {
			ConfigValue::Bool(flag) => Some(*flag),
			_ => None,
		}
	}

	pub fn require_str(&self, key: &str) -> Result<String, MissingKey> {
		self.get_str(key).ok_or_else(|| MissingKey(key.to_string()))
	}

	pub fn require_int(&self, key: &str) -> Result<i64, MissingKey> {
		self.get_int(key).ok_or_else(|| MissingKey(key.to_string()))
	}
}
