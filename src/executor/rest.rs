//! HTTP transport for the node's text-command protocol.
//!
//! Commands travel in the `command` header of a request to the node's REST
//! endpoint; state-changing commands may carry a payload body. The transport
//! knows nothing about what the commands mean.

use std::time::Duration;

use reqwest::{Client, Method, Response};
use tracing::{debug, warn};

use super::{CommandError, CommandExecutor, CommandOutcome};

/// Attempts per command before a connectivity failure is surfaced.
const MAX_ATTEMPTS: u32 = 2;
/// Pause between attempts.
const RETRY_PAUSE: Duration = Duration::from_millis(500);

const USER_AGENT: &str = "AnyLog/1.23";

/// REST client executing text commands against a single node.
#[derive(Clone)]
pub struct RestExecutor {
	http_client: Client,
	node_url: String,
}

impl RestExecutor {
	/// Create an executor for `conn` (an `ip:port` pair) with the given
	/// per-request timeout. A timeout counts as a connectivity failure.
	pub fn new(conn: &str, timeout: Duration) -> Result<Self, CommandError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			node_url: format!("http://{conn}"),
		})
	}

	async fn execute(
		&self,
		method: Method,
		command: &str,
		payload: Option<&str>,
	) -> Result<CommandOutcome, CommandError> {
		for attempt in 1..=MAX_ATTEMPTS {
			let mut request = self
				.http_client
				.request(method.clone(), &self.node_url)
				.header("command", command)
				.header("User-Agent", USER_AGENT);
			if let Some(body) = payload {
				request = request.body(body.to_string());
			}

			match request.send().await {
				Ok(response) => return handle_response(command, response).await,
				Err(error) => {
					let command_error = CommandError::Http(error);
					if command_error.is_connectivity() && attempt < MAX_ATTEMPTS {
						warn!(
							"attempt {} of `{}` failed ({}), retrying",
							attempt, command, command_error
						);
						tokio::time::sleep(RETRY_PAUSE).await;
						continue;
					}
					return Err(command_error);
				}
			}
		}
		Err(CommandError::Unreachable(self.node_url.clone()))
	}
}

async fn handle_response(command: &str, response: Response) -> Result<CommandOutcome, CommandError> {
	let status = response.status();
	let raw = response
		.text()
		.await
		.map_err(|error| CommandError::Malformed(error.to_string()))?;
	if !status.is_success() {
		return Err(CommandError::Rejected {
			command: command.to_string(),
			detail: format!("{status}: {}", raw.trim()),
		});
	}
	// The node answers JSON when the command supports it, plain text otherwise.
	match serde_json::from_str(&raw) {
		Ok(value) => Ok(CommandOutcome::Json(value)),
		Err(_) => Ok(CommandOutcome::Text(raw)),
	}
}

#[async_trait::async_trait]
impl CommandExecutor for RestExecutor {
	async fn get(&self, command: &str) -> Result<CommandOutcome, CommandError> {
		debug!("GET `{}` against {}", command, self.node_url);
		self.execute(Method::GET, command, None).await
	}

	async fn post(&self, command: &str, payload: Option<&str>) -> Result<CommandOutcome, CommandError> {
		debug!("POST `{}` against {}", command, self.node_url);
		self.execute(Method::POST, command, payload).await
	}
}
