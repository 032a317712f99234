// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Claimable task lifecycle.
//!
//! ```text
//!            claim             start
//!   Queued ---------> Claimed ---------> Executing
//!     ^                  |                   |
//!     |   reset / retry  |                   |
//!     +------------------+-------------------+
//!                        |                   |
//!                        v     complete      v
//!                    Completed <-------------+
//! ```
//!
//! `Completed` also parks tasks whose datum stream or integration is disabled.
//! Moving between `Queued` and `Completed` only happens through the bulk
//! enable/disable cascade, never through a single-task transition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{QueueError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
	Queued,
	Claimed,
	Executing,
	Completed,
}

impl TaskState {
	pub const ALL: [TaskState; 4] = [
		TaskState::Queued,
		TaskState::Claimed,
		TaskState::Executing,
		TaskState::Completed,
	];

	/// Single-character code stored in the `status` column.
	pub fn code(&self) -> &'static str {
		match self {
			TaskState::Queued => "q",
			TaskState::Claimed => "c",
			TaskState::Executing => "e",
			TaskState::Completed => "k",
		}
	}

	pub fn from_code(code: &str) -> Result<Self> {
		match code {
			"q" => Ok(TaskState::Queued),
			"c" => Ok(TaskState::Claimed),
			"e" => Ok(TaskState::Executing),
			"k" => Ok(TaskState::Completed),
			_ => Err(QueueError::UnknownState(code.to_string())),
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			TaskState::Queued => "queued",
			TaskState::Claimed => "claimed",
			TaskState::Executing => "executing",
			TaskState::Completed => "completed",
		}
	}

	/// A task in an active state holds its datum stream's exclusivity slot.
	pub fn is_active(&self) -> bool {
		matches!(self, TaskState::Claimed | TaskState::Executing)
	}

	pub fn can_transition_to(&self, next: TaskState) -> bool {
		matches!(
			(self, next),
			(TaskState::Queued, TaskState::Claimed)
				| (TaskState::Claimed, TaskState::Executing)
				| (TaskState::Claimed, TaskState::Queued)
				| (TaskState::Executing, TaskState::Queued)
				| (TaskState::Claimed, TaskState::Completed)
				| (TaskState::Executing, TaskState::Completed)
		)
	}

	pub fn ensure_transition(&self, next: TaskState) -> Result<()> {
		if self.can_transition_to(next) {
			Ok(())
		} else {
			Err(QueueError::InvalidTransition {
				from: *self,
				to: next,
			})
		}
	}
}

impl fmt::Display for TaskState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TaskState {
	type Err = QueueError;

	/// Accepts either the long name (`"queued"`) or the stored code (`"q"`).
	fn from_str(s: &str) -> Result<Self> {
		match s {
			"queued" => Ok(TaskState::Queued),
			"claimed" => Ok(TaskState::Claimed),
			"executing" => Ok(TaskState::Executing),
			"completed" => Ok(TaskState::Completed),
			other => TaskState::from_code(other),
		}
	}
}
