//! Configuration file readers.
//!
//! Two layouts are supported: `.env` key=value files and the YAML deployment
//! layout, where every top-level section except `metadata`, `image` and
//! `other` is flattened into one map.

use std::path::Path;

use indexmap::IndexMap;
use tracing::warn;

/// Sections of the YAML layout that never contribute node configuration.
const SKIPPED_SECTIONS: [&str; 3] = ["metadata", "image", "other"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
	#[error("failed to read configuration file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse .env file: {0}")]
	Env(#[from] dotenvy::Error),

	#[error("failed to parse YAML file: {0}")]
	Yaml(#[from] serde_yaml::Error),

	#[error("unsupported configuration file extension `{0}` (expected env, yml or yaml)")]
	UnsupportedExtension(String),
}

/// Read a configuration file into an ordered key/value map.
pub fn read_config_file(path: &Path) -> Result<IndexMap<String, String>, ConfigFileError> {
	let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
	match extension {
		"env" => read_dotenv(path),
		"yml" | "yaml" => flatten_yaml(&std::fs::read_to_string(path)?),
		other => Err(ConfigFileError::UnsupportedExtension(other.to_string())),
	}
}

fn read_dotenv(path: &Path) -> Result<IndexMap<String, String>, ConfigFileError> {
	let mut values = IndexMap::new();
	for entry in dotenvy::from_path_iter(path)? {
		let (key, value) = entry?;
		values.insert(key, value);
	}
	Ok(values)
}

fn flatten_yaml(text: &str) -> Result<IndexMap<String, String>, ConfigFileError> {
	let document: serde_yaml::Value = serde_yaml::from_str(text)?;
	let mut values = IndexMap::new();
	let Some(sections) = document.as_mapping() else {
		return Ok(values);
	};
	for (section, body) in sections {
		let name = section.as_str().unwrap_or_default();
		if SKIPPED_SECTIONS.contains(&name) {
			continue;
		}
		let Some(entries) = body.as_mapping() else {
			warn!("skipping non-mapping configuration section `{}`", name);
			continue;
		};
		for (key, value) in entries {
			let Some(key) = key.as_str() else { continue };
			values.insert(key.to_string(), render_scalar(value));
		}
	}
	Ok(values)
}

fn render_scalar(value: &serde_yaml::Value) -> String {
	match value {
		serde_yaml::Value::String(text) => text.clone(),
		serde_yaml::Value::Bool(flag) => flag.to_string(),
		serde_yaml::Value::Number(number) => number.to_string(),
		serde_yaml::Value::Null => String::new(),
		other => serde_yaml::to_string(other)
			.unwrap_or_default()
			.trim_end()
			.to_string(),
	}
}
