// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::JobError;
use crate::types::TriggerSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	/// Context for a run started outside the scheduler, e.g. from the CLI.
	pub fn manual() -> Self {
		Self {
			run_id: uuid::Uuid::new_v4().to_string(),
			triggered_by: TriggerSource::Manual,
			cancellation_token: CancellationToken::new(),
		}
	}

	/// Returns `JobError::Cancelled` once the job has been cancelled. Jobs call
	/// this between units of work.
	pub fn check_cancelled(&self) -> Result<(), JobError> {
		if self.cancellation_token.is_cancelled() {
			Err(JobError::Cancelled)
		} else {
			Ok(())
		}
	}
}

/// Cooperative cancellation flag. The scheduler cancels it on shutdown so a
/// job stops between units of work.
#[derive(Clone, Debug)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}
