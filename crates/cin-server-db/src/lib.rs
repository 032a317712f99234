// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for the cloud integration task queue.
//!
//! - [`TaskQueue`]: the claimable task store, one per task kind
//! - [`ConfigRepository`]: integrations and datum streams, whose enabled
//!   flags cascade to their tasks
//! - [`ClaimableTaskStore`] and [`AbandonedTaskSweep`]: the seams the worker
//!   runtime and scheduled jobs are written against

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod queue;
pub mod store;
pub mod table;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
	CascadeSummary, ConfigRepository, DatumStream, DatumStreamMapping, Integration,
};
pub use error::{DbError, Result};
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use queue::{PollTaskQueue, RakeTaskQueue, TaskQueue};
pub use store::{AbandonedTaskSweep, ClaimableTaskStore};
pub use table::TaskTable;
