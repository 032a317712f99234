// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cloud integration task queue server binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use cin_queue_core::UserId;
use cin_server::{reclaim_once, run_server, task_counts, version, Executors, QueueStores};
use cin_server_config::{LoggingConfig, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// cin-server - claimable task queue for cloud datum stream polling.
#[derive(Parser, Debug)]
#[command(name = "cin-server", about = "Cloud integration task queue server", version)]
struct Args {
	/// Config file to use instead of /etc/cin/server.toml
	#[arg(long, global = true, env = "CIN_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run migrations, then the reclaimer until interrupted (default)
	Serve,
	/// Apply database migrations and exit
	Migrate,
	/// Return abandoned claimed or executing tasks to the queue once
	Reclaim {
		/// Override the configured abandoned threshold
		#[arg(long)]
		older_than_secs: Option<u64>,
	},
	/// Print task counts by state
	Status {
		#[arg(long)]
		user_id: Option<i64>,
	},
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let command = args.command.unwrap_or(Command::Serve);
	if let Command::Version = command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	let config = match &args.config {
		Some(path) => cin_server_config::load_config_with_file(path)?,
		None => cin_server_config::load_config()?,
	};
	init_tracing(&config.logging);

	match command {
		Command::Serve => serve(&config).await,
		Command::Migrate => {
			QueueStores::open(&config.database).await?;
			tracing::info!(database = %config.database.url, "migrations applied");
			Ok(())
		}
		Command::Reclaim { older_than_secs } => {
			let threshold = older_than_secs
				.map(Duration::from_secs)
				.unwrap_or_else(|| config.queue.abandoned_threshold());
			let stores = QueueStores::open(&config.database).await?;
			let output = reclaim_once(&stores, threshold).await?;
			println!("{}", output.message);
			Ok(())
		}
		Command::Status { user_id } => {
			let stores = QueueStores::open(&config.database).await?;
			let counts = task_counts(&stores, user_id.map(UserId)).await?;
			for (kind, by_state) in [("poll", &counts.poll), ("rake", &counts.rake)] {
				for (state, count) in by_state {
					println!("{kind:<5} {state:<10} {count}");
				}
			}
			Ok(())
		}
		Command::Version => Ok(()),
	}
}

async fn serve(config: &ServerConfig) -> anyhow::Result<()> {
	tracing::info!(
		database = %config.database.url,
		reclaim_enabled = config.queue.reclaim_enabled,
		"starting cin-server"
	);
	run_server(config, Executors::default(), shutdown_signal()).await
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| logging.level.clone().into());

	tracing_subscriber::registry()
		.with(filter)
		.with(logging.json.then(|| tracing_subscriber::fmt::layer().json()))
		.with((!logging.json).then(tracing_subscriber::fmt::layer))
		.init();
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "failed to listen for Ctrl+C, shutting down");
	}
}
