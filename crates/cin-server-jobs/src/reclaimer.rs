// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic job returning abandoned tasks to the queue.
//!
//! A task is abandoned when it has been claimed or executing for longer than
//! the configured threshold, measured from its execution time. Typically the
//! worker that claimed it crashed.

use async_trait::async_trait;
use chrono::Utc;
use cin_server_db::AbandonedTaskSweep;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::Job;
use crate::types::JobOutput;

pub struct AbandonedTaskReclaimerJob {
	sweeps: Vec<Arc<dyn AbandonedTaskSweep>>,
	threshold: Duration,
}

impl AbandonedTaskReclaimerJob {
	pub fn new(sweeps: Vec<Arc<dyn AbandonedTaskSweep>>, threshold: Duration) -> Self {
		Self { sweeps, threshold }
	}
}

#[async_trait]
impl Job for AbandonedTaskReclaimerJob {
	fn id(&self) -> &str {
		"abandoned-task-reclaimer"
	}

	fn name(&self) -> &str {
		"Abandoned Task Reclaimer"
	}

	fn description(&self) -> &str {
		"Return claimed or executing tasks that exceeded the abandoned threshold to the queue"
	}

	#[instrument(skip(self, ctx), fields(job_id = "abandoned-task-reclaimer", run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		let threshold = chrono::Duration::from_std(self.threshold).map_err(|e| JobError::Failed {
			message: format!("abandoned threshold out of range: {e}"),
			retryable: false,
		})?;
		let older_than = Utc::now() - threshold;

		let mut total = 0u64;
		let mut per_kind = serde_json::Map::new();
		for sweep in &self.sweeps {
			ctx.check_cancelled()?;
			let reset = sweep
				.reset_abandoned_executing_tasks(older_than)
				.await
				.map_err(|e| {
					JobError::from_db(&format!("failed to reset abandoned {} tasks", sweep.kind()), e)
				})?;
			per_kind.insert(sweep.kind().to_string(), json!(reset));
			total += reset;
		}

		if total > 0 {
			info!(total, %older_than, "Reset abandoned tasks");
		}

		Ok(JobOutput {
			message: format!("Reset {total} abandoned tasks"),
			metadata: Some(json!({
				"older_than": older_than.to_rfc3339(),
				"reset": per_kind,
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::CancellationToken;
	use crate::types::TriggerSource;
	use chrono::{DateTime, Duration as ChronoDuration};
	use cin_queue_core::{ClaimableTask, PollTask, RakeTask, TaskState, UserId};
	use cin_server_db::testing::{create_queue_test_pool, seed_datum_stream, seed_sibling_stream};
	use cin_server_db::{DbError, PollTaskQueue, RakeTaskQueue};

	fn sweep(sweep: impl AbandonedTaskSweep + 'static) -> Arc<dyn AbandonedTaskSweep> {
		Arc::new(sweep)
	}

	struct FailingSweep;

	#[async_trait]
	impl AbandonedTaskSweep for FailingSweep {
		fn kind(&self) -> &'static str {
			"broken"
		}

		async fn reset_abandoned_executing_tasks(
			&self,
			_older_than: DateTime<Utc>,
		) -> cin_server_db::Result<u64> {
			Err(DbError::Internal("disk on fire".to_string()))
		}
	}

	#[tokio::test]
	async fn test_sweep_error_fails_job() {
		let job = AbandonedTaskReclaimerJob::new(vec![sweep(FailingSweep)], Duration::from_secs(60));
		match job.run(&JobContext::manual()).await {
			Err(JobError::Failed { message, retryable }) => {
				assert!(message.contains("broken"));
				assert!(!retryable);
			}
			other => panic!("expected failure, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_resets_both_kinds() {
		let pool = create_queue_test_pool().await;
		let seeded = seed_datum_stream(&pool, UserId(1)).await;
		let sibling = seed_sibling_stream(&pool, &seeded).await;
		let polls = PollTaskQueue::new(pool.clone());
		let rakes = RakeTaskQueue::new(pool);

		let old = Utc::now() - ChronoDuration::hours(3);
		polls
			.create(&PollTask::new(seeded.user_id, seeded.datum_stream_id, old, old))
			.await
			.unwrap();
		rakes
			.create(&RakeTask::new(seeded.user_id, sibling, old, Duration::from_secs(60)))
			.await
			.unwrap();
		let poll = polls.claim_queued_task().await.unwrap().unwrap();
		let rake = rakes.claim_queued_task().await.unwrap().unwrap();
		rakes.start_executing(rake.key()).await.unwrap();

		let job = AbandonedTaskReclaimerJob::new(
			vec![sweep(polls.clone()), sweep(rakes.clone())],
			Duration::from_secs(3600),
		);
		let output = job.run(&JobContext::manual()).await.unwrap();
		assert_eq!(output.message, "Reset 2 abandoned tasks");
		let metadata = output.metadata.unwrap();
		assert_eq!(metadata["reset"]["poll"], 1);
		assert_eq!(metadata["reset"]["rake"], 1);

		assert_eq!(polls.get(poll.key()).await.unwrap().unwrap().state, TaskState::Queued);
		assert_eq!(rakes.get(rake.key()).await.unwrap().unwrap().state, TaskState::Queued);

		let again = job.run(&JobContext::manual()).await.unwrap();
		assert_eq!(again.message, "Reset 0 abandoned tasks");
	}

	#[tokio::test]
	async fn test_recent_tasks_are_left_alone() {
		let pool = create_queue_test_pool().await;
		let seeded = seed_datum_stream(&pool, UserId(1)).await;
		let polls = PollTaskQueue::new(pool);

		let now = Utc::now();
		polls
			.create(&PollTask::new(seeded.user_id, seeded.datum_stream_id, now, now))
			.await
			.unwrap();
		let claimed = polls.claim_queued_task().await.unwrap().unwrap();

		let job = AbandonedTaskReclaimerJob::new(vec![sweep(polls.clone())], Duration::from_secs(3600));
		job.run(&JobContext::manual()).await.unwrap();
		assert_eq!(
			polls.get(claimed.key()).await.unwrap().unwrap().state,
			TaskState::Claimed
		);
	}

	#[tokio::test]
	async fn test_cancelled_before_sweep() {
		let pool = create_queue_test_pool().await;
		let job = AbandonedTaskReclaimerJob::new(
			vec![sweep(PollTaskQueue::new(pool))],
			Duration::from_secs(60),
		);
		let ctx = JobContext {
			run_id: "run".to_string(),
			triggered_by: TriggerSource::Schedule,
			cancellation_token: CancellationToken::new(),
		};
		ctx.cancellation_token.cancel();
		assert!(matches!(job.run(&ctx).await, Err(JobError::Cancelled)));
	}
}
