// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring for the cloud integration task queue process.
//!
//! The binary runs migrations and the abandoned-task reclaimer. Processes that
//! actually poll or rake datum streams embed this crate and pass their
//! [`TaskExecutor`]s in [`Executors`]; a worker is started for each kind that
//! has one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cin_queue_core::{PollTask, RakeTask, TaskState, UserId};
use cin_server_config::{DatabaseConfig, QueueConfig, ServerConfig};
use cin_server_db::{
	create_pool, run_migrations, AbandonedTaskSweep, ClaimableTaskStore, ConfigRepository,
	PollTaskQueue, RakeTaskQueue,
};
use cin_server_jobs::{
	AbandonedTaskReclaimerJob, Job, JobContext, JobOutput, JobScheduler, TaskExecutor, TaskWorker,
	WorkerConfig,
};
use sqlx::SqlitePool;
use tracing::{info, warn};

pub mod version;

/// Task executors supplied by the embedding process.
#[derive(Default, Clone)]
pub struct Executors {
	pub poll: Option<Arc<dyn TaskExecutor<PollTask>>>,
	pub rake: Option<Arc<dyn TaskExecutor<RakeTask>>>,
}

impl Executors {
	pub fn is_empty(&self) -> bool {
		self.poll.is_none() && self.rake.is_none()
	}
}

/// The pool and the repositories built on it.
#[derive(Clone)]
pub struct QueueStores {
	pub pool: SqlitePool,
	pub poll: Arc<PollTaskQueue>,
	pub rake: Arc<RakeTaskQueue>,
	pub config: ConfigRepository,
}

impl QueueStores {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			poll: Arc::new(PollTaskQueue::new(pool.clone())),
			rake: Arc::new(RakeTaskQueue::new(pool.clone())),
			config: ConfigRepository::new(pool.clone()),
			pool,
		}
	}

	/// Connect and bring the schema up to date.
	pub async fn open(config: &DatabaseConfig) -> anyhow::Result<Self> {
		let pool = create_pool(&config.url, config.max_connections).await?;
		run_migrations(&pool).await?;
		Ok(Self::new(pool))
	}

	fn sweeps(&self) -> Vec<Arc<dyn AbandonedTaskSweep>> {
		vec![
			Arc::clone(&self.poll) as Arc<dyn AbandonedTaskSweep>,
			Arc::clone(&self.rake) as Arc<dyn AbandonedTaskSweep>,
		]
	}
}

/// Task counts per state for both kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskCounts {
	pub poll: BTreeMap<TaskState, u64>,
	pub rake: BTreeMap<TaskState, u64>,
}

pub async fn task_counts(stores: &QueueStores, user_id: Option<UserId>) -> anyhow::Result<TaskCounts> {
	Ok(TaskCounts {
		poll: stores.poll.count_by_state(user_id).await?,
		rake: stores.rake.count_by_state(user_id).await?,
	})
}

/// Worker settings for one task kind. Only rake tasks are one-off, so only
/// they can be deleted on completion.
pub fn worker_config(queue: &QueueConfig, delete_completed: bool) -> WorkerConfig {
	WorkerConfig {
		idle_poll_interval: queue.idle_poll_interval(),
		retry_delay: queue.retry_delay(),
		delete_completed,
	}
}

pub fn reclaimer_job(stores: &QueueStores, threshold: Duration) -> AbandonedTaskReclaimerJob {
	AbandonedTaskReclaimerJob::new(stores.sweeps(), threshold)
}

/// Run one reclaim sweep immediately.
pub async fn reclaim_once(stores: &QueueStores, threshold: Duration) -> anyhow::Result<JobOutput> {
	let output = reclaimer_job(stores, threshold)
		.run(&JobContext::manual())
		.await?;
	Ok(output)
}

pub fn build_scheduler(stores: &QueueStores, queue: &QueueConfig) -> JobScheduler {
	let mut scheduler = JobScheduler::new();
	if queue.reclaim_enabled {
		scheduler.register_periodic(
			Arc::new(reclaimer_job(stores, queue.abandoned_threshold())),
			queue.reclaim_interval(),
		);
	} else {
		info!("Abandoned task reclaimer disabled");
	}
	scheduler
}

/// Run the scheduler and a worker per supplied executor until `shutdown`
/// completes, then stop them all. Tasks in flight are finished first.
pub async fn serve<F>(
	stores: &QueueStores,
	queue: &QueueConfig,
	executors: Executors,
	shutdown: F,
) -> anyhow::Result<()>
where
	F: Future<Output = ()>,
{
	let scheduler = build_scheduler(stores, queue);
	scheduler.start().await?;

	if executors.is_empty() {
		warn!("No task executors supplied, only scheduled jobs will run");
	}

	let mut workers = Vec::new();
	if let Some(executor) = executors.poll {
		let worker = TaskWorker::new(
			"poll",
			Arc::clone(&stores.poll) as Arc<dyn ClaimableTaskStore<PollTask>>,
			executor,
			worker_config(queue, false),
		);
		workers.push(Arc::new(worker).spawn(scheduler.subscribe_shutdown()));
	}
	if let Some(executor) = executors.rake {
		let worker = TaskWorker::new(
			"rake",
			Arc::clone(&stores.rake) as Arc<dyn ClaimableTaskStore<RakeTask>>,
			executor,
			worker_config(queue, queue.delete_completed_rake_tasks),
		);
		workers.push(Arc::new(worker).spawn(scheduler.subscribe_shutdown()));
	}

	shutdown.await;
	info!("Shutdown requested");

	scheduler.shutdown().await;
	for handle in workers {
		if let Err(e) = handle.await {
			warn!(error = %e, "Task worker panicked");
		}
	}

	info!("cin-server stopped");
	Ok(())
}

/// Open the database from `config` and [`serve`] until `shutdown`.
pub async fn run_server<F>(config: &ServerConfig, executors: Executors, shutdown: F) -> anyhow::Result<()>
where
	F: Future<Output = ()>,
{
	let stores = QueueStores::open(&config.database).await?;
	serve(&stores, &config.queue, executors, shutdown).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use cin_queue_core::ClaimableTask;
	use cin_server_db::testing::{create_queue_test_pool, seed_datum_stream};

	#[test]
	fn test_worker_config_from_queue_config() {
		let queue = QueueConfig {
			idle_poll_interval_ms: 250,
			retry_delay_secs: 30,
			..Default::default()
		};
		let config = worker_config(&queue, true);
		assert_eq!(config.idle_poll_interval, Duration::from_millis(250));
		assert_eq!(config.retry_delay, Duration::from_secs(30));
		assert!(config.delete_completed);
	}

	#[tokio::test]
	async fn test_scheduler_registers_reclaimer_when_enabled() {
		let stores = QueueStores::new(create_queue_test_pool().await);

		let scheduler = build_scheduler(&stores, &QueueConfig::default());
		assert_eq!(scheduler.job_ids(), vec!["abandoned-task-reclaimer".to_string()]);

		let disabled = QueueConfig {
			reclaim_enabled: false,
			..Default::default()
		};
		assert!(build_scheduler(&stores, &disabled).job_ids().is_empty());
	}

	#[tokio::test]
	async fn test_reclaim_once_resets_both_kinds() {
		let pool = create_queue_test_pool().await;
		let seeded = seed_datum_stream(&pool, UserId(1)).await;
		let stores = QueueStores::new(pool);

		let past = Utc::now() - chrono::Duration::hours(3);
		stores
			.poll
			.create(&PollTask::new(seeded.user_id, seeded.datum_stream_id, past, past))
			.await
			.unwrap();
		let claimed = stores.poll.claim_queued_task().await.unwrap().unwrap();
		assert_eq!(claimed.state(), TaskState::Claimed);

		let output = reclaim_once(&stores, Duration::from_secs(3600)).await.unwrap();
		assert_eq!(output.message, "Reset 1 abandoned tasks");

		let counts = task_counts(&stores, Some(seeded.user_id)).await.unwrap();
		assert_eq!(counts.poll.get(&TaskState::Queued), Some(&1));
		assert_eq!(counts.poll.get(&TaskState::Claimed), None);
		assert!(counts.rake.is_empty());
	}
}
