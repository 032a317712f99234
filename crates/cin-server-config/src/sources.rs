// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, QueueConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/cin/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::ConfigRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::ConfigParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: CIN_SERVER_<SECTION>_<FIELD>
#[derive(Debug, Default)]
pub struct EnvSource {
	fixed: Option<HashMap<String, String>>,
}

impl EnvSource {
	/// Reads the process environment.
	pub fn process() -> Self {
		Self::default()
	}

	/// Reads only the given variables.
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			fixed: Some(
				vars.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		let value = match &self.fixed {
			Some(vars) => vars.get(name).cloned(),
			None => std::env::var(name).ok(),
		};
		value.filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn u32(&self, name: &str) -> Result<Option<u32>, ConfigError> {
		match self.var(name) {
			Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidEnv {
				var: name.to_string(),
				value: v,
				expected: "u32",
			}),
			None => Ok(None),
		}
	}

	fn u64(&self, name: &str) -> Result<Option<u64>, ConfigError> {
		match self.var(name) {
			Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidEnv {
				var: name.to_string(),
				value: v,
				expected: "u64",
			}),
			None => Ok(None),
		}
	}

	fn load_database(&self) -> Result<DatabaseConfigLayer, ConfigError> {
		Ok(DatabaseConfigLayer {
			url: self.var("CIN_SERVER_DATABASE_URL"),
			max_connections: self.u32("CIN_SERVER_DATABASE_MAX_CONNECTIONS")?,
		})
	}

	fn load_logging(&self) -> LoggingConfigLayer {
		LoggingConfigLayer {
			level: self.var("CIN_SERVER_LOG_LEVEL"),
			json: self.bool("CIN_SERVER_LOG_JSON"),
		}
	}

	fn load_queue(&self) -> Result<QueueConfigLayer, ConfigError> {
		Ok(QueueConfigLayer {
			reclaim_enabled: self.bool("CIN_SERVER_QUEUE_RECLAIM_ENABLED"),
			reclaim_interval_secs: self.u64("CIN_SERVER_QUEUE_RECLAIM_INTERVAL_SECS")?,
			abandoned_threshold_secs: self.u64("CIN_SERVER_QUEUE_ABANDONED_THRESHOLD_SECS")?,
			idle_poll_interval_ms: self.u64("CIN_SERVER_QUEUE_IDLE_POLL_INTERVAL_MS")?,
			retry_delay_secs: self.u64("CIN_SERVER_QUEUE_RETRY_DELAY_SECS")?,
			delete_completed_rake_tasks: self.bool("CIN_SERVER_QUEUE_DELETE_COMPLETED_RAKE_TASKS"),
		})
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(self.load_database()?),
			logging: Some(self.load_logging()),
			queue: Some(self.load_queue()?),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_order() {
		assert!(Precedence::Defaults < Precedence::ConfigFile);
		assert!(Precedence::ConfigFile < Precedence::Environment);
	}

	#[test]
	fn test_missing_toml_is_empty_layer() {
		let layer = TomlSource::new("/nonexistent/cin/server.toml")
			.load()
			.unwrap();
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_toml_sections() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[database]
url = "sqlite:/tmp/queue.db"

[queue]
reclaim_interval_secs = 30
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(
			layer.database.unwrap().url.as_deref(),
			Some("sqlite:/tmp/queue.db")
		);
		assert_eq!(layer.queue.unwrap().reclaim_interval_secs, Some(30));
		assert!(layer.logging.is_none());
	}

	#[test]
	fn test_invalid_toml_reports_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[queue\nreclaim_enabled = ").unwrap();

		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::ConfigParse { ref path, .. } if path == file.path()));
		assert!(err
			.to_string()
			.starts_with(&format!("cin-server config {} is not valid TOML", file.path().display())));
	}

	#[test]
	fn test_env_values() {
		let source = EnvSource::from_vars([
			("CIN_SERVER_DATABASE_MAX_CONNECTIONS", "16"),
			("CIN_SERVER_LOG_JSON", "1"),
			("CIN_SERVER_QUEUE_RECLAIM_ENABLED", "false"),
			("CIN_SERVER_QUEUE_ABANDONED_THRESHOLD_SECS", "900"),
			("CIN_SERVER_LOG_LEVEL", ""),
		]);
		let layer = source.load().unwrap();

		assert_eq!(layer.database.unwrap().max_connections, Some(16));
		let logging = layer.logging.unwrap();
		assert_eq!(logging.json, Some(true));
		assert_eq!(logging.level, None);
		let queue = layer.queue.unwrap();
		assert_eq!(queue.reclaim_enabled, Some(false));
		assert_eq!(queue.abandoned_threshold_secs, Some(900));
		assert_eq!(queue.retry_delay_secs, None);
	}

	#[test]
	fn test_env_invalid_number() {
		let source = EnvSource::from_vars([("CIN_SERVER_QUEUE_RETRY_DELAY_SECS", "soon")]);
		let err = source.load().unwrap_err();
		assert_eq!(
			err.to_string(),
			r#"CIN_SERVER_QUEUE_RETRY_DELAY_SECS="soon" is not a valid u64"#
		);
	}
}
