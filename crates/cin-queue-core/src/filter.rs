// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task selection criteria shared by queries, bulk deletes and the
//! enable/disable cascade.

use serde::{Deserialize, Serialize};

use crate::{DatumStreamId, IntegrationId, TaskId, TaskState, UserId};

/// Criteria for selecting tasks. Empty lists place no restriction; non-empty
/// lists are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
	pub user_id: Option<UserId>,
	/// Matches tasks whose datum stream is mapped to one of these integrations.
	#[serde(default)]
	pub integration_ids: Vec<IntegrationId>,
	#[serde(default)]
	pub datum_stream_ids: Vec<DatumStreamId>,
	/// Only rake tasks carry a task id. A poll task never matches a filter
	/// that lists task ids.
	#[serde(default)]
	pub task_ids: Vec<TaskId>,
	#[serde(default)]
	pub states: Vec<TaskState>,
	pub limit: Option<u32>,
	#[serde(default)]
	pub offset: u32,
}

impl TaskFilter {
	pub fn for_user(user_id: UserId) -> Self {
		Self {
			user_id: Some(user_id),
			..Default::default()
		}
	}

	pub fn with_integrations(mut self, ids: impl IntoIterator<Item = IntegrationId>) -> Self {
		self.integration_ids.extend(ids);
		self
	}

	pub fn with_datum_streams(mut self, ids: impl IntoIterator<Item = DatumStreamId>) -> Self {
		self.datum_stream_ids.extend(ids);
		self
	}

	pub fn with_task_ids(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
		self.task_ids.extend(ids);
		self
	}

	pub fn with_states(mut self, states: impl IntoIterator<Item = TaskState>) -> Self {
		self.states.extend(states);
		self
	}

	pub fn paged(mut self, limit: u32, offset: u32) -> Self {
		self.limit = Some(limit);
		self.offset = offset;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder_accumulates() {
		let filter = TaskFilter::for_user(UserId(1))
			.with_datum_streams([DatumStreamId(2)])
			.with_datum_streams([DatumStreamId(3)])
			.with_states([TaskState::Queued])
			.paged(10, 20);

		assert_eq!(filter.user_id, Some(UserId(1)));
		assert_eq!(filter.datum_stream_ids, vec![DatumStreamId(2), DatumStreamId(3)]);
		assert_eq!(filter.states, vec![TaskState::Queued]);
		assert_eq!(filter.limit, Some(10));
		assert_eq!(filter.offset, 20);
	}

	#[test]
	fn test_deserialize_partial() {
		let filter: TaskFilter = serde_json::from_str(r#"{"user_id": 5, "states": ["claimed"]}"#).unwrap();
		assert_eq!(filter.user_id, Some(UserId(5)));
		assert_eq!(filter.states, vec![TaskState::Claimed]);
		assert!(filter.integration_ids.is_empty());
		assert_eq!(filter.limit, None);
	}
}
