// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for task queue core operations.

use thiserror::Error;

use crate::TaskState;

/// Result type for task queue core operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
	#[error("unknown task state: {0}")]
	UnknownState(String),

	#[error("illegal task state transition: {from} -> {to}")]
	InvalidTransition { from: TaskState, to: TaskState },
}
