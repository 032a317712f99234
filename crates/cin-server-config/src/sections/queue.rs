// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task queue section: reclaimer schedule and worker pacing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueConfigLayer {
	pub reclaim_enabled: Option<bool>,
	pub reclaim_interval_secs: Option<u64>,
	pub abandoned_threshold_secs: Option<u64>,
	pub idle_poll_interval_ms: Option<u64>,
	pub retry_delay_secs: Option<u64>,
	pub delete_completed_rake_tasks: Option<bool>,
}

impl QueueConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.reclaim_enabled.is_some() {
			self.reclaim_enabled = other.reclaim_enabled;
		}
		if other.reclaim_interval_secs.is_some() {
			self.reclaim_interval_secs = other.reclaim_interval_secs;
		}
		if other.abandoned_threshold_secs.is_some() {
			self.abandoned_threshold_secs = other.abandoned_threshold_secs;
		}
		if other.idle_poll_interval_ms.is_some() {
			self.idle_poll_interval_ms = other.idle_poll_interval_ms;
		}
		if other.retry_delay_secs.is_some() {
			self.retry_delay_secs = other.retry_delay_secs;
		}
		if other.delete_completed_rake_tasks.is_some() {
			self.delete_completed_rake_tasks = other.delete_completed_rake_tasks;
		}
	}

	pub fn finalize(self) -> QueueConfig {
		let defaults = QueueConfig::default();
		QueueConfig {
			reclaim_enabled: self.reclaim_enabled.unwrap_or(defaults.reclaim_enabled),
			reclaim_interval_secs: self
				.reclaim_interval_secs
				.unwrap_or(defaults.reclaim_interval_secs),
			abandoned_threshold_secs: self
				.abandoned_threshold_secs
				.unwrap_or(defaults.abandoned_threshold_secs),
			idle_poll_interval_ms: self
				.idle_poll_interval_ms
				.unwrap_or(defaults.idle_poll_interval_ms),
			retry_delay_secs: self.retry_delay_secs.unwrap_or(defaults.retry_delay_secs),
			delete_completed_rake_tasks: self
				.delete_completed_rake_tasks
				.unwrap_or(defaults.delete_completed_rake_tasks),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
	pub reclaim_enabled: bool,
	pub reclaim_interval_secs: u64,
	/// Claimed or executing tasks whose execution time is older than this are
	/// considered abandoned.
	pub abandoned_threshold_secs: u64,
	pub idle_poll_interval_ms: u64,
	pub retry_delay_secs: u64,
	pub delete_completed_rake_tasks: bool,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			reclaim_enabled: true,
			reclaim_interval_secs: 60,
			abandoned_threshold_secs: 3600,
			idle_poll_interval_ms: 1000,
			retry_delay_secs: 300,
			delete_completed_rake_tasks: true,
		}
	}
}

impl QueueConfig {
	pub fn reclaim_interval(&self) -> Duration {
		Duration::from_secs(self.reclaim_interval_secs)
	}

	pub fn abandoned_threshold(&self) -> Duration {
		Duration::from_secs(self.abandoned_threshold_secs)
	}

	pub fn idle_poll_interval(&self) -> Duration {
		Duration::from_millis(self.idle_poll_interval_ms)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_secs(self.retry_delay_secs)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		for (key, value) in [
			("queue.reclaim_interval_secs", self.reclaim_interval_secs),
			("queue.abandoned_threshold_secs", self.abandoned_threshold_secs),
			("queue.idle_poll_interval_ms", self.idle_poll_interval_ms),
		] {
			if value == 0 {
				return Err(ConfigError::NotPositive { key });
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = QueueConfigLayer::default().finalize();
		assert_eq!(config, QueueConfig::default());
		assert_eq!(config.abandoned_threshold(), Duration::from_secs(3600));
		assert_eq!(config.idle_poll_interval(), Duration::from_millis(1000));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_zero_interval_rejected() {
		let config = QueueConfigLayer {
			reclaim_interval_secs: Some(0),
			..Default::default()
		}
		.finalize();
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("queue.reclaim_interval_secs"));
	}

	#[test]
	fn test_zero_retry_delay_allowed() {
		let config = QueueConfigLayer {
			retry_delay_secs: Some(0),
			..Default::default()
		}
		.finalize();
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_deserialize_partial() {
		let layer: QueueConfigLayer = toml::from_str(
			r#"
reclaim_enabled = false
abandoned_threshold_secs = 7200
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert!(!config.reclaim_enabled);
		assert_eq!(config.abandoned_threshold_secs, 7200);
		assert_eq!(config.reclaim_interval_secs, 60);
	}
}
