// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration error types.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("{var}={value:?} is not a valid {expected}")]
	InvalidEnv {
		var: String,
		value: String,
		expected: &'static str,
	},

	#[error("cin-server config {path} is not valid TOML: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("cannot read cin-server config {path}: {source}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("{key} must be greater than zero")]
	NotPositive { key: &'static str },
}
