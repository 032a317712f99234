// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::job::Job;
use crate::types::TriggerSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

const BASE_RETRY_DELAY_SECS: u64 = 1;
const MAX_RETRY_DELAY_SECS: u64 = 60;
const RETRY_FACTOR: f64 = 2.0;
const MAX_RETRIES: u32 = 3;

struct RegisteredJob {
	job: Arc<dyn Job>,
	interval: Duration,
}

pub struct JobScheduler {
	jobs: Vec<RegisteredJob>,
	cancellation_token: CancellationToken,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for JobScheduler {
	fn default() -> Self {
		Self::new()
	}
}

impl JobScheduler {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: Vec::new(),
			cancellation_token: CancellationToken::new(),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	/// Run `job` every `interval`. Registering the same id twice replaces the
	/// earlier job.
	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		if let Some(pos) = self.jobs.iter().position(|r| r.job.id() == job.id()) {
			warn!(job_id = %job.id(), "replacing already registered job");
			self.jobs.remove(pos);
		}
		self.jobs.push(RegisteredJob { job, interval });
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.iter().map(|r| r.job.id().to_string()).collect()
	}

	/// Receiver that fires when [`shutdown`](Self::shutdown) is called. Task
	/// workers subscribe to stop alongside the scheduled jobs.
	pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
		self.shutdown_tx.subscribe()
	}

	/// Spawn a loop per job. The first run happens one interval after start.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for registered in &self.jobs {
			let job = Arc::clone(&registered.job);
			let interval = registered.interval;
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let cancellation_token = self.cancellation_token.clone();

			let handle = tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {
							let _ = run_job_with_retry(&job, &cancellation_token).await;
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job.id(), "Shutting down periodic job");
							break;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
		Ok(())
	}

	/// Stop every job loop. A run in progress sees its context cancelled and
	/// is awaited.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.cancellation_token.cancel();
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}
}

async fn run_job_with_retry(
	job: &Arc<dyn Job>,
	cancellation_token: &CancellationToken,
) -> Result<String> {
	let mut retry_count = 0u32;
	let run_id = uuid::Uuid::new_v4().to_string();
	let started = Instant::now();

	loop {
		let ctx = JobContext {
			run_id: run_id.clone(),
			triggered_by: if retry_count > 0 {
				TriggerSource::Retry
			} else {
				TriggerSource::Schedule
			},
			cancellation_token: cancellation_token.clone(),
		};

		match job.run(&ctx).await {
			Ok(output) => {
				info!(
					job_id = %job.id(),
					run_id = %run_id,
					retry_count,
					duration_ms = started.elapsed().as_millis() as u64,
					message = %output.message,
					"Job completed successfully"
				);
				return Ok(run_id);
			}
			Err(JobError::Cancelled) => {
				info!(job_id = %job.id(), run_id = %run_id, "Job cancelled");
				return Err(JobError::Cancelled);
			}
			Err(JobError::Failed { message, retryable }) => {
				if retryable && retry_count < MAX_RETRIES && !cancellation_token.is_cancelled() {
					retry_count += 1;
					let delay_secs = calculate_backoff_delay(retry_count);
					warn!(
						job_id = %job.id(),
						run_id = %run_id,
						retry_count,
						delay_secs,
						error = %message,
						"Job failed, retrying"
					);
					tokio::time::sleep(Duration::from_secs(delay_secs)).await;
					continue;
				}

				warn!(job_id = %job.id(), run_id = %run_id, retry_count, error = %message, "Job failed");
				return Err(JobError::Failed { message, retryable });
			}
			Err(e) => {
				warn!(job_id = %job.id(), run_id = %run_id, error = %e, "Job failed with error");
				return Err(e);
			}
		}
	}
}

pub(crate) fn calculate_backoff_delay(retry_count: u32) -> u64 {
	let delay = BASE_RETRY_DELAY_SECS as f64 * RETRY_FACTOR.powi(retry_count as i32 - 1);
	(delay as u64).min(MAX_RETRY_DELAY_SECS)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JobOutput;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicU32, Ordering};

	/// Fails `failures` times with the given retryability, then succeeds.
	struct FlakyJob {
		id: String,
		failures: u32,
		retryable: bool,
		calls: AtomicU32,
	}

	impl FlakyJob {
		fn new(id: &str, failures: u32, retryable: bool) -> Self {
			Self {
				id: id.to_string(),
				failures,
				retryable,
				calls: AtomicU32::new(0),
			}
		}
	}

	#[async_trait]
	impl Job for FlakyJob {
		fn id(&self) -> &str {
			&self.id
		}

		fn name(&self) -> &str {
			"Flaky Job"
		}

		fn description(&self) -> &str {
			"Fails a fixed number of times before succeeding"
		}

		async fn run(&self, ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			ctx.check_cancelled()?;
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			if call < self.failures {
				return Err(JobError::Failed {
					message: format!("attempt {call} failed"),
					retryable: self.retryable,
				});
			}
			Ok(JobOutput {
				message: "done".to_string(),
				metadata: None,
			})
		}
	}

	fn flaky(id: &str, failures: u32, retryable: bool) -> Arc<FlakyJob> {
		Arc::new(FlakyJob::new(id, failures, retryable))
	}

	#[test]
	fn test_calculate_backoff_delay() {
		assert_eq!(calculate_backoff_delay(1), BASE_RETRY_DELAY_SECS);
		assert_eq!(calculate_backoff_delay(2), 2);
		assert_eq!(calculate_backoff_delay(3), 4);
	}

	#[test]
	fn test_calculate_backoff_delay_caps_at_max() {
		assert_eq!(calculate_backoff_delay(10), MAX_RETRY_DELAY_SECS);
		assert_eq!(calculate_backoff_delay(100), MAX_RETRY_DELAY_SECS);
	}

	#[test]
	fn test_register_replaces_same_id() {
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(flaky("a", 0, false), Duration::from_secs(60));
		scheduler.register_periodic(flaky("b", 0, false), Duration::from_secs(60));
		scheduler.register_periodic(flaky("a", 0, false), Duration::from_secs(30));

		assert_eq!(scheduler.job_ids(), vec!["b".to_string(), "a".to_string()]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retryable_failure_is_retried() {
		let job = flaky("flaky", 2, true);
		let dyn_job: Arc<dyn Job> = job.clone();

		run_job_with_retry(&dyn_job, &CancellationToken::new())
			.await
			.unwrap();
		assert_eq!(job.calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retries_are_bounded() {
		let job = flaky("broken", u32::MAX, true);
		let dyn_job: Arc<dyn Job> = job.clone();

		let err = run_job_with_retry(&dyn_job, &CancellationToken::new())
			.await
			.unwrap_err();
		assert!(matches!(err, JobError::Failed { retryable: true, .. }));
		assert_eq!(job.calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
	}

	#[tokio::test]
	async fn test_permanent_failure_is_not_retried() {
		let job = flaky("broken", u32::MAX, false);
		let dyn_job: Arc<dyn Job> = job.clone();

		let err = run_job_with_retry(&dyn_job, &CancellationToken::new())
			.await
			.unwrap_err();
		assert!(matches!(err, JobError::Failed { retryable: false, .. }));
		assert_eq!(job.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_periodic_job_runs_until_shutdown() {
		let mut scheduler = JobScheduler::new();
		let job = flaky("tick", 0, false);
		scheduler.register_periodic(job.clone(), Duration::from_secs(10));

		scheduler.start().await.unwrap();
		tokio::time::sleep(Duration::from_secs(35)).await;
		scheduler.shutdown().await;

		assert_eq!(job.calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_shutdown_cancels_job_context() {
		let scheduler = JobScheduler::new();
		scheduler.shutdown().await;

		let job = flaky("late", 0, false);
		let dyn_job: Arc<dyn Job> = job.clone();
		let err = run_job_with_retry(&dyn_job, &scheduler.cancellation_token)
			.await
			.unwrap_err();
		assert!(matches!(err, JobError::Cancelled));
		assert_eq!(job.calls.load(Ordering::SeqCst), 0);
	}
}
