//! Types for the text-command executor seam.

use serde_json::Value;

/// Body of a command response from the node.
///
/// The node answers with JSON when the command supports it and raw text
/// otherwise; callers branch on the variant rather than re-parsing.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
	Json(Value),
	Text(String),
}

impl CommandOutcome {
	/// Borrow the JSON body if the node answered with JSON.
	pub fn as_json(&self) -> Option<&Value> {
		match self {
			CommandOutcome::Json(value) => Some(value),
			CommandOutcome::Text(_) => None,
		}
	}

	/// Render the body as text for substring checks and diagnostics.
	pub fn to_text(&self) -> String {
		match self {
			CommandOutcome::Json(value) => value.to_string(),
			CommandOutcome::Text(text) => text.clone(),
		}
	}

	/// True when the node answered with an empty body.
	pub fn is_empty(&self) -> bool {
		match self {
			CommandOutcome::Json(Value::Null) => true,
			CommandOutcome::Json(Value::Array(items)) => items.is_empty(),
			CommandOutcome::Json(Value::Object(map)) => map.is_empty(),
			CommandOutcome::Json(Value::String(text)) => text.trim().is_empty(),
			CommandOutcome::Json(_) => false,
			CommandOutcome::Text(text) => text.trim().is_empty(),
		}
	}
}

/// Error types for command execution against the node
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("node unreachable: {0}")]
	Unreachable(String),

	#[error("node rejected `{command}`: {detail}")]
	Rejected { command: String, detail: String },

	#[error("malformed response body: {0}")]
	Malformed(String),
}

impl CommandError {
	/// Whether this is a transport-level failure worth a bounded retry.
	pub fn is_connectivity(&self) -> bool {
		match self {
			CommandError::Http(error) => {
				error.is_timeout() || error.is_connect() || error.is_request()
			}
			CommandError::Unreachable(_) => true,
			_ => false,
		}
	}
}
