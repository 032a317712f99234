// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Trait seams used by the worker runtime and scheduled jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cin_queue_core::{ClaimableTask, TaskOutcome, TaskState};

use crate::error::Result;
use crate::queue::TaskQueue;
use crate::table::TaskTable;

/// The subset of the task store a worker needs.
#[async_trait]
pub trait ClaimableTaskStore<T: ClaimableTask>: Send + Sync {
	async fn claim_queued_task(&self) -> Result<Option<T>>;
	async fn start_executing(&self, key: T::Key) -> Result<bool>;
	async fn report(&self, task: &T, outcome: &TaskOutcome) -> Result<bool>;
	async fn delete_if_state(&self, key: T::Key, expected: TaskState) -> Result<bool>;
}

#[async_trait]
impl<T: TaskTable> ClaimableTaskStore<T> for TaskQueue<T> {
	async fn claim_queued_task(&self) -> Result<Option<T>> {
		self.claim_queued_task().await
	}

	async fn start_executing(&self, key: T::Key) -> Result<bool> {
		self.start_executing(key).await
	}

	async fn report(&self, task: &T, outcome: &TaskOutcome) -> Result<bool> {
		self.report(task, outcome).await
	}

	async fn delete_if_state(&self, key: T::Key, expected: TaskState) -> Result<bool> {
		self.delete_if_state(key, expected).await
	}
}

/// A task table the abandoned-task reclaimer can sweep.
#[async_trait]
pub trait AbandonedTaskSweep: Send + Sync {
	fn kind(&self) -> &'static str;
	async fn reset_abandoned_executing_tasks(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
impl<T: TaskTable> AbandonedTaskSweep for TaskQueue<T> {
	fn kind(&self) -> &'static str {
		T::KIND
	}

	async fn reset_abandoned_executing_tasks(&self, older_than: DateTime<Utc>) -> Result<u64> {
		self.reset_abandoned_executing_tasks(older_than).await
	}
}
