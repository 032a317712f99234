// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use cin_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Job cancelled")]
	Cancelled,

	#[error("Job failed: {message}")]
	Failed { message: String, retryable: bool },

	#[error("Database error: {0}")]
	Db(#[from] DbError),
}

impl JobError {
	/// A failure the scheduler should retry with backoff.
	pub fn from_db(context: &str, err: DbError) -> Self {
		JobError::Failed {
			message: format!("{context}: {err}"),
			retryable: err.is_transient(),
		}
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
