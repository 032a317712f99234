// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Claim-execute-report loop for one task kind.
//!
//! The queue never runs tasks itself. A [`TaskExecutor`] does the actual poll
//! or rake; [`TaskWorker`] claims a task, marks it executing, hands it to the
//! executor and records the outcome. Several workers, in one process or many,
//! can share a store: the claim keeps them apart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cin_queue_core::{ClaimableTask, TaskOutcome, TaskState};
use cin_server_db::{ClaimableTaskStore, DbError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Failure executing a task.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
	pub message: String,
	/// Retryable failures requeue the task after the worker's retry delay.
	/// Others park it as completed with the message.
	pub retryable: bool,
}

impl ExecutionError {
	pub fn retryable(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			retryable: true,
		}
	}

	pub fn permanent(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			retryable: false,
		}
	}
}

#[async_trait]
pub trait TaskExecutor<T: ClaimableTask>: Send + Sync {
	/// Run a task that is already marked executing and say what happens next.
	async fn execute(&self, task: &T) -> Result<TaskOutcome, ExecutionError>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
	/// Sleep between claim attempts while nothing is claimable.
	pub idle_poll_interval: Duration,
	/// Delay before a task that failed with a retryable error runs again.
	pub retry_delay: Duration,
	/// Delete tasks once they complete instead of keeping them parked.
	pub delete_completed: bool,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			idle_poll_interval: Duration::from_millis(1000),
			retry_delay: Duration::from_secs(300),
			delete_completed: false,
		}
	}
}

pub struct TaskWorker<T: ClaimableTask> {
	name: String,
	store: Arc<dyn ClaimableTaskStore<T>>,
	executor: Arc<dyn TaskExecutor<T>>,
	config: WorkerConfig,
}

impl<T: ClaimableTask> TaskWorker<T> {
	pub fn new(
		name: impl Into<String>,
		store: Arc<dyn ClaimableTaskStore<T>>,
		executor: Arc<dyn TaskExecutor<T>>,
		config: WorkerConfig,
	) -> Self {
		Self {
			name: name.into(),
			store,
			executor,
			config,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Claim and process at most one task. Returns the key of the task that
	/// was claimed, or `None` if nothing was claimable.
	#[tracing::instrument(skip(self), fields(worker = %self.name))]
	pub async fn run_once(&self) -> Result<Option<T::Key>, DbError> {
		let Some(mut task) = self.store.claim_queued_task().await? else {
			return Ok(None);
		};
		let key = task.key();

		if !self.store.start_executing(key).await? {
			debug!(%key, "claimed task was reset before it started");
			return Ok(Some(key));
		}
		task.set_state(TaskState::Executing);

		let outcome = match self.executor.execute(&task).await {
			Ok(outcome) => outcome,
			Err(e) if e.retryable => {
				warn!(%key, error = %e, "task execution failed, will retry");
				TaskOutcome::Retry {
					execute_at: retry_at(&self.config),
					message: e.message,
				}
			}
			Err(e) => {
				warn!(%key, error = %e, "task execution failed permanently");
				TaskOutcome::Fail { message: e.message }
			}
		};

		let recorded = self.store.report(&task, &outcome).await?;
		if recorded
			&& self.config.delete_completed
			&& matches!(outcome, TaskOutcome::Complete { .. })
			&& self.store.delete_if_state(key, TaskState::Completed).await?
		{
			debug!(%key, "completed task deleted");
		}

		Ok(Some(key))
	}

	/// Process tasks until `shutdown` fires. A task being executed when the
	/// signal arrives is finished and reported first.
	pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
		info!(worker = %self.name, "Task worker started");

		loop {
			if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
				break;
			}

			let idle = match self.run_once().await {
				Ok(Some(_)) => false,
				Ok(None) => true,
				Err(e) if e.is_transient() => {
					warn!(worker = %self.name, error = %e, "Transient store error, backing off");
					true
				}
				Err(e) => {
					error!(worker = %self.name, error = %e, "Task worker iteration failed");
					true
				}
			};

			if idle {
				tokio::select! {
					_ = tokio::time::sleep(self.config.idle_poll_interval) => {}
					_ = shutdown.recv() => break,
				}
			}
		}

		info!(worker = %self.name, "Task worker stopped");
	}

	pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
		tokio::spawn(async move { self.run(shutdown).await })
	}
}

fn retry_at(config: &WorkerConfig) -> DateTime<Utc> {
	let now = Utc::now();
	chrono::Duration::from_std(config.retry_delay)
		.ok()
		.and_then(|delay| now.checked_add_signed(delay))
		.unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
	use super::*;
	use cin_queue_core::{PollTask, RakeTask, UserId};
	use cin_server_db::testing::{create_queue_test_pool, seed_datum_stream, SeededStream};
	use cin_server_db::{PollTaskQueue, RakeTaskQueue};
	use std::sync::atomic::{AtomicU32, Ordering};
	use tokio::sync::Mutex;

	/// Returns the same scripted result for every task and records what it saw.
	struct ScriptedExecutor {
		result: Result<TaskOutcome, ExecutionError>,
		seen: Mutex<Vec<TaskState>>,
		calls: AtomicU32,
	}

	impl ScriptedExecutor {
		fn new(result: Result<TaskOutcome, ExecutionError>) -> Arc<Self> {
			Arc::new(Self {
				result,
				seen: Mutex::new(Vec::new()),
				calls: AtomicU32::new(0),
			})
		}
	}

	#[async_trait]
	impl<T: ClaimableTask> TaskExecutor<T> for ScriptedExecutor {
		async fn execute(&self, task: &T) -> Result<TaskOutcome, ExecutionError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.seen.lock().await.push(task.state());
			self.result.clone()
		}
	}

	async fn rake_setup(
		result: Result<TaskOutcome, ExecutionError>,
		config: WorkerConfig,
	) -> (RakeTaskQueue, SeededStream, Arc<ScriptedExecutor>, TaskWorker<RakeTask>) {
		let pool = create_queue_test_pool().await;
		let seeded = seed_datum_stream(&pool, UserId(1)).await;
		let queue = RakeTaskQueue::new(pool);
		let executor = ScriptedExecutor::new(result);
		let worker = TaskWorker::new(
			"rake-test",
			Arc::new(queue.clone()) as Arc<dyn ClaimableTaskStore<RakeTask>>,
			executor.clone() as Arc<dyn TaskExecutor<RakeTask>>,
			config,
		);
		(queue, seeded, executor, worker)
	}

	fn due_rake(seeded: &SeededStream) -> RakeTask {
		RakeTask::new(
			seeded.user_id,
			seeded.datum_stream_id,
			Utc::now() - chrono::Duration::minutes(1),
			Duration::from_secs(3600),
		)
	}

	#[tokio::test]
	async fn test_idle_when_nothing_claimable() {
		let (_, _, executor, worker) =
			rake_setup(Ok(TaskOutcome::Complete { message: None }), WorkerConfig::default()).await;
		assert_eq!(worker.run_once().await.unwrap(), None);
		assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_executor_sees_executing_task() {
		let (queue, seeded, executor, worker) =
			rake_setup(Ok(TaskOutcome::Complete { message: None }), WorkerConfig::default()).await;
		let key = queue.create(&due_rake(&seeded)).await.unwrap();

		assert_eq!(worker.run_once().await.unwrap(), Some(key));
		assert_eq!(*executor.seen.lock().await, vec![TaskState::Executing]);
		assert_eq!(queue.get(key).await.unwrap().unwrap().state, TaskState::Completed);
	}

	#[tokio::test]
	async fn test_completed_rake_deleted_when_configured() {
		let config = WorkerConfig {
			delete_completed: true,
			..WorkerConfig::default()
		};
		let (queue, seeded, _, worker) =
			rake_setup(Ok(TaskOutcome::Complete { message: None }), config).await;
		let key = queue.create(&due_rake(&seeded)).await.unwrap();

		worker.run_once().await.unwrap();
		assert!(queue.get(key).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_retryable_error_requeues_later() {
		let (queue, seeded, _, worker) = rake_setup(
			Err(ExecutionError::retryable("service unavailable")),
			WorkerConfig::default(),
		)
		.await;
		let key = queue.create(&due_rake(&seeded)).await.unwrap();

		let before = Utc::now();
		worker.run_once().await.unwrap();
		let task = queue.get(key).await.unwrap().unwrap();
		assert_eq!(task.state, TaskState::Queued);
		assert_eq!(task.message.as_deref(), Some("service unavailable"));
		assert!(task.execute_at >= before + chrono::Duration::seconds(300));

		// Not due yet, so nothing to claim.
		assert_eq!(worker.run_once().await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_permanent_error_parks_task() {
		let (queue, seeded, _, worker) = rake_setup(
			Err(ExecutionError::permanent("bad credentials")),
			WorkerConfig {
				delete_completed: true,
				..WorkerConfig::default()
			},
		)
		.await;
		let key = queue.create(&due_rake(&seeded)).await.unwrap();

		worker.run_once().await.unwrap();
		let task = queue.get(key).await.unwrap().unwrap();
		assert_eq!(task.state, TaskState::Completed);
		assert_eq!(task.message.as_deref(), Some("bad credentials"));
	}

	#[tokio::test]
	async fn test_poll_reschedule_moves_window() {
		let pool = create_queue_test_pool().await;
		let seeded = seed_datum_stream(&pool, UserId(1)).await;
		let queue = PollTaskQueue::new(pool);

		let now = Utc::now();
		let next = now + chrono::Duration::minutes(5);
		let executor = ScriptedExecutor::new(Ok(TaskOutcome::Reschedule {
			execute_at: next,
			start_at: Some(now),
		}));
		let worker = TaskWorker::new(
			"poll-test",
			Arc::new(queue.clone()) as Arc<dyn ClaimableTaskStore<PollTask>>,
			executor as Arc<dyn TaskExecutor<PollTask>>,
			WorkerConfig::default(),
		);

		let start = now - chrono::Duration::hours(1);
		let task = PollTask::new(seeded.user_id, seeded.datum_stream_id, now, start);
		queue.create(&task).await.unwrap();

		worker.run_once().await.unwrap();
		let stored = queue.get(task.key()).await.unwrap().unwrap();
		assert_eq!(stored.state, TaskState::Queued);
		assert_eq!(stored.execute_at, next);
		assert_eq!(stored.start_at, now);
	}

	#[tokio::test]
	async fn test_run_drains_queue_then_stops_on_shutdown() {
		let config = WorkerConfig {
			idle_poll_interval: Duration::from_millis(10),
			..WorkerConfig::default()
		};
		let (queue, seeded, executor, worker) =
			rake_setup(Ok(TaskOutcome::Complete { message: None }), config).await;
		for _ in 0..3 {
			queue.create(&due_rake(&seeded)).await.unwrap();
		}

		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		let handle = Arc::new(worker).spawn(shutdown_rx);

		for _ in 0..200 {
			if executor.calls.load(Ordering::SeqCst) == 3 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		shutdown_tx.send(()).unwrap();
		handle.await.unwrap();

		assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
		let counts = queue.count_by_state(None).await.unwrap();
		assert_eq!(counts.get(&TaskState::Completed), Some(&3));
	}
}
