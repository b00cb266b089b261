mod config;
mod executor;
mod ledger;
mod node;
mod reconcile;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use crate::config::ConfigFileError;
use crate::executor::RestExecutor;
use crate::reconcile::NodeReconciler;

/// Bring an AnyLog node to its declared, running state over REST.
#[derive(Debug, Parser)]
#[command(name = "anylog-reconciler", version, about)]
struct Args {
	/// REST connection of the node to reconcile (ip:port).
	rest_conn: String,

	/// Configuration file (.env or flattened YAML).
	config_file: PathBuf,

	/// REST request timeout in seconds.
	#[arg(long, default_value_t = 30)]
	timeout: u64,

	/// Log command-level diagnostics.
	#[arg(short = 'e', long)]
	print_exceptions: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let args = Args::parse();

	let default_level = if args.print_exceptions {
		tracing::Level::DEBUG
	} else {
		tracing::Level::INFO
	};
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
		)
		.with_target(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let file_config = match config::read_config_file(&args.config_file) {
		Ok(values) => values,
		Err(ConfigFileError::UnsupportedExtension(ext)) => {
			error!(
				"cannot read {}: unsupported extension `{}` (expected .env, .yml or .yaml)",
				args.config_file.display(),
				ext
			);
			std::process::exit(1);
		}
		Err(err) => {
			error!(
				"failed to read configuration file {}: {}",
				args.config_file.display(),
				err
			);
			std::process::exit(1);
		}
	};

	let executor = match RestExecutor::new(&args.rest_conn, Duration::from_secs(args.timeout)) {
		Ok(executor) => Arc::new(executor),
		Err(err) => {
			error!("failed to build REST client for {}: {}", args.rest_conn, err);
			std::process::exit(1);
		}
	};

	info!("starting reconciliation against {}", args.rest_conn);
	let reconciler = NodeReconciler::new(executor, file_config);
	if let Err(failure) = reconciler.run().await {
		error!("halted at {}: {}", failure.state, failure.error);
		std::process::exit(1);
	}
	info!("node converged");
}
