// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use cin_queue_core::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Queue error: {0}")]
	Queue(#[from] QueueError),
}

/// SQLite primary result codes for a locked database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl DbError {
	/// Whether retrying the same operation later may succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			DbError::Sqlx(sqlx::Error::PoolTimedOut) | DbError::Sqlx(sqlx::Error::Io(_)) => true,
			DbError::Sqlx(sqlx::Error::Database(err)) => err
				.code()
				.and_then(|code| code.parse::<i32>().ok())
				.map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
				.unwrap_or(false),
			_ => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
	use super::*;
	use cin_queue_core::TaskState;

	#[test]
	fn test_queue_errors_convert() {
		let err: DbError = TaskState::Completed
			.ensure_transition(TaskState::Claimed)
			.unwrap_err()
			.into();
		assert!(matches!(err, DbError::Queue(QueueError::InvalidTransition { .. })));
		assert!(!err.is_transient());
	}

	#[test]
	fn test_pool_timeout_is_transient() {
		assert!(DbError::Sqlx(sqlx::Error::PoolTimedOut).is_transient());
		assert!(!DbError::NotFound("x".to_string()).is_transient());
	}
}
