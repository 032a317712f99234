// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! What a worker reports after executing a claimed task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClaimableTask, TaskState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
	/// Success for a recurring task: queue the next run.
	Reschedule {
		execute_at: DateTime<Utc>,
		start_at: Option<DateTime<Utc>>,
	},
	/// Success for a one-off task.
	Complete { message: Option<String> },
	/// Failure that should be attempted again later.
	Retry {
		execute_at: DateTime<Utc>,
		message: String,
	},
	/// Failure that should not be attempted again.
	Fail { message: String },
}

impl TaskOutcome {
	pub fn next_state(&self) -> TaskState {
		match self {
			TaskOutcome::Reschedule { .. } | TaskOutcome::Retry { .. } => TaskState::Queued,
			TaskOutcome::Complete { .. } | TaskOutcome::Fail { .. } => TaskState::Completed,
		}
	}

	/// Write this outcome onto `task`. The previous message is always replaced,
	/// so a successful reschedule clears the diagnostic of an earlier failure.
	pub fn apply_to<T: ClaimableTask>(&self, task: &mut T) {
		task.set_state(self.next_state());
		match self {
			TaskOutcome::Reschedule {
				execute_at,
				start_at,
			} => {
				task.set_execute_at(*execute_at);
				if let Some(start_at) = start_at {
					task.set_start_at(*start_at);
				}
				task.set_message(None);
			}
			TaskOutcome::Complete { message } => task.set_message(message.clone()),
			TaskOutcome::Retry {
				execute_at,
				message,
			} => {
				task.set_execute_at(*execute_at);
				task.set_message(Some(message.clone()));
			}
			TaskOutcome::Fail { message } => task.set_message(Some(message.clone())),
		}
	}
}
