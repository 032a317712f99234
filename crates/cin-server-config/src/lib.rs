// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered server configuration.
//!
//! Each source produces a [`ServerConfigLayer`] whose fields are all optional.
//! Layers are merged in precedence order and then resolved into a
//! [`ServerConfig`] with defaults filled in.

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::{DatabaseConfig, LoggingConfig, QueueConfig};
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub queue: QueueConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`CIN_SERVER_*`)
/// 2. Config file (`/etc/cin/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource::process()),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![Box::new(EnvSource::process())])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource::process()),
	])
}

/// Merge the given sources in precedence order and resolve the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let queue = layer.queue.unwrap_or_default().finalize();

	if database.max_connections == 0 {
		return Err(ConfigError::NotPositive {
			key: "database.max_connections",
		});
	}
	queue.validate()?;

	info!(
		database = %database.url,
		max_connections = database.max_connections,
		reclaim_enabled = queue.reclaim_enabled,
		abandoned_threshold_secs = queue.abandoned_threshold_secs,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		logging,
		queue,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_defaults_only() {
		let config = load_from_sources(vec![Box::new(DefaultsSource)]).unwrap();
		assert_eq!(config, ServerConfig::default());
	}

	#[test]
	fn test_env_overrides_file_regardless_of_order() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[database]
url = "sqlite:/from/file.db"
max_connections = 2

[queue]
retry_delay_secs = 10
"#
		)
		.unwrap();

		let config = load_from_sources(vec![
			Box::new(EnvSource::from_vars([(
				"CIN_SERVER_DATABASE_URL",
				"sqlite:/from/env.db",
			)])),
			Box::new(TomlSource::new(file.path())),
			Box::new(DefaultsSource),
		])
		.unwrap();

		assert_eq!(config.database.url, "sqlite:/from/env.db");
		assert_eq!(config.database.max_connections, 2);
		assert_eq!(config.queue.retry_delay_secs, 10);
		assert_eq!(config.logging.level, "info");
	}

	#[test]
	fn test_zero_max_connections_rejected() {
		let result = load_from_sources(vec![Box::new(EnvSource::from_vars([(
			"CIN_SERVER_DATABASE_MAX_CONNECTIONS",
			"0",
		)]))]);
		assert!(matches!(result, Err(ConfigError::NotPositive { key: "database.max_connections" })));
	}

	#[test]
	fn test_zero_abandoned_threshold_rejected() {
		let result = load_from_sources(vec![Box::new(EnvSource::from_vars([(
			"CIN_SERVER_QUEUE_ABANDONED_THRESHOLD_SECS",
			"0",
		)]))]);
		let err = result.unwrap_err();
		assert!(err.to_string().contains("abandoned_threshold_secs"));
	}

	#[test]
	fn test_missing_custom_file_falls_back() {
		let dir = tempfile::tempdir().unwrap();
		let config = load_from_sources(vec![
			Box::new(DefaultsSource),
			Box::new(TomlSource::new(dir.path().join("absent.toml"))),
		])
		.unwrap();
		assert_eq!(config.queue.reclaim_interval_secs, 60);
	}
}
