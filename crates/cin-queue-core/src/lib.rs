// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the cloud integration task queue.
//!
//! Two task kinds share one lifecycle:
//! - [`PollTask`]: one recurring task per datum stream, anchored at `start_at`
//! - [`RakeTask`]: on-demand reprocessing tasks, many per datum stream, each
//!   looking back by a fixed `offset`
//!
//! Both implement [`ClaimableTask`], which is what the storage layer and the
//! worker runtime are generic over.

pub mod error;
pub mod filter;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use error::{QueueError, Result};
pub use filter::TaskFilter;
pub use ids::{DatumStreamId, IntegrationId, MappingId, TaskId, UserId};
pub use outcome::TaskOutcome;
pub use state::TaskState;
pub use task::{
	ClaimableTask, PollTask, PollTaskKey, RakeTask, RakeTaskKey, ServiceProperties,
};
