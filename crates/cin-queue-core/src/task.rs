// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task records for the two task kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use crate::{DatumStreamId, TaskId, TaskState, UserId};

/// Opaque configuration handed to whatever executes the task. Never inspected
/// by the queue.
pub type ServiceProperties = HashMap<String, serde_json::Value>;

/// Behaviour shared by every task kind the queue can hold.
pub trait ClaimableTask: Clone + fmt::Debug + Send + Sync + 'static {
	type Key: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

	fn key(&self) -> Self::Key;
	fn user_id(&self) -> UserId;
	/// The resource used for group exclusivity.
	fn datum_stream_id(&self) -> DatumStreamId;
	fn state(&self) -> TaskState;
	fn set_state(&mut self, state: TaskState);
	fn execute_at(&self) -> DateTime<Utc>;
	fn set_execute_at(&mut self, execute_at: DateTime<Utc>);
	fn message(&self) -> Option<&str>;
	fn set_message(&mut self, message: Option<String>);

	/// Move the anchor of the next run. Only meaningful for kinds that have one.
	fn set_start_at(&mut self, _start_at: DateTime<Utc>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollTaskKey {
	pub user_id: UserId,
	pub datum_stream_id: DatumStreamId,
}

impl fmt::Display for PollTaskKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.user_id, self.datum_stream_id)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RakeTaskKey {
	pub user_id: UserId,
	pub task_id: TaskId,
}

impl fmt::Display for RakeTaskKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.user_id, self.task_id)
	}
}

/// Recurring poll of a datum stream. At most one exists per datum stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollTask {
	pub user_id: UserId,
	pub datum_stream_id: DatumStreamId,
	pub state: TaskState,
	pub execute_at: DateTime<Utc>,
	/// Start of the data window the next poll will request.
	pub start_at: DateTime<Utc>,
	pub message: Option<String>,
	pub service_props: Option<ServiceProperties>,
}

impl PollTask {
	pub fn new(
		user_id: UserId,
		datum_stream_id: DatumStreamId,
		execute_at: DateTime<Utc>,
		start_at: DateTime<Utc>,
	) -> Self {
		Self {
			user_id,
			datum_stream_id,
			state: TaskState::Queued,
			execute_at,
			start_at,
			message: None,
			service_props: None,
		}
	}
}

impl ClaimableTask for PollTask {
	type Key = PollTaskKey;

	fn key(&self) -> PollTaskKey {
		PollTaskKey {
			user_id: self.user_id,
			datum_stream_id: self.datum_stream_id,
		}
	}

	fn user_id(&self) -> UserId {
		self.user_id
	}

	fn datum_stream_id(&self) -> DatumStreamId {
		self.datum_stream_id
	}

	fn state(&self) -> TaskState {
		self.state
	}

	fn set_state(&mut self, state: TaskState) {
		self.state = state;
	}

	fn execute_at(&self) -> DateTime<Utc> {
		self.execute_at
	}

	fn set_execute_at(&mut self, execute_at: DateTime<Utc>) {
		self.execute_at = execute_at;
	}

	fn message(&self) -> Option<&str> {
		self.message.as_deref()
	}

	fn set_message(&mut self, message: Option<String>) {
		self.message = message;
	}

	fn set_start_at(&mut self, start_at: DateTime<Utc>) {
		self.start_at = start_at;
	}
}

/// Reprocessing of a look-back window of a datum stream.
///
/// Several rake tasks may be outstanding for one datum stream, but only one of
/// them can be claimed or executing at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RakeTask {
	pub user_id: UserId,
	/// Assigned by the store on create.
	pub id: TaskId,
	pub datum_stream_id: DatumStreamId,
	pub state: TaskState,
	pub execute_at: DateTime<Utc>,
	/// How far before `execute_at` the reprocessed window starts. Stored with
	/// whole-second precision.
	pub offset: Duration,
	pub message: Option<String>,
	pub service_props: Option<ServiceProperties>,
}

impl RakeTask {
	pub fn new(
		user_id: UserId,
		datum_stream_id: DatumStreamId,
		execute_at: DateTime<Utc>,
		offset: Duration,
	) -> Self {
		Self {
			user_id,
			id: TaskId(0),
			datum_stream_id,
			state: TaskState::Queued,
			execute_at,
			offset,
			message: None,
			service_props: None,
		}
	}

	/// Start of the window to reprocess, or `None` if the offset reaches past
	/// the representable range.
	pub fn rake_start(&self) -> Option<DateTime<Utc>> {
		chrono::Duration::from_std(self.offset)
			.ok()
			.and_then(|offset| self.execute_at.checked_sub_signed(offset))
	}
}

impl ClaimableTask for RakeTask {
	type Key = RakeTaskKey;

	fn key(&self) -> RakeTaskKey {
		RakeTaskKey {
			user_id: self.user_id,
			task_id: self.id,
		}
	}

	fn user_id(&self) -> UserId {
		self.user_id
	}

	fn datum_stream_id(&self) -> DatumStreamId {
		self.datum_stream_id
	}

	fn state(&self) -> TaskState {
		self.state
	}

	fn set_state(&mut self, state: TaskState) {
		self.state = state;
	}

	fn execute_at(&self) -> DateTime<Utc> {
		self.execute_at
	}

	fn set_execute_at(&mut self, execute_at: DateTime<Utc>) {
		self.execute_at = execute_at;
	}

	fn message(&self) -> Option<&str> {
		self.message.as_deref()
	}

	fn set_message(&mut self, message: Option<String>) {
		self.message = message;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn test_poll_task_starts_queued() {
		let now = Utc::now();
		let task = PollTask::new(UserId(1), DatumStreamId(2), now, now);
		assert_eq!(task.state, TaskState::Queued);
		assert_eq!(task.key().to_string(), "1/2");
	}

	#[test]
	fn test_set_start_at_moves_poll_anchor() {
		let now = Utc::now();
		let mut task = PollTask::new(UserId(1), DatumStreamId(2), now, now);
		let later = now + chrono::Duration::minutes(5);
		task.set_start_at(later);
		assert_eq!(task.start_at, later);
	}

	#[test]
	fn test_rake_start() {
		let exec = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
		let task = RakeTask::new(
			UserId(1),
			DatumStreamId(2),
			exec,
			Duration::from_secs(24 * 3600),
		);
		assert_eq!(
			task.rake_start(),
			Some(Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap())
		);
	}

	#[test]
	fn test_rake_start_out_of_range() {
		let task = RakeTask::new(UserId(1), DatumStreamId(2), Utc::now(), Duration::MAX);
		assert_eq!(task.rake_start(), None);
	}

	#[test]
	fn test_service_props_pass_through_serde() {
		let mut props = ServiceProperties::new();
		props.insert("source".to_string(), serde_json::json!("a/b/c"));
		let mut task = RakeTask::new(UserId(1), DatumStreamId(2), Utc::now(), Duration::from_secs(60));
		task.service_props = Some(props.clone());

		let json = serde_json::to_string(&task).unwrap();
		let parsed: RakeTask = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed.service_props, Some(props));
	}
}
