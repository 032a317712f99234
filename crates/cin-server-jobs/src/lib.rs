// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background work for the cloud integration task queue.
//!
//! - [`JobScheduler`] runs periodic [`Job`]s with retry and backoff until
//!   shutdown. The abandoned-task reclaimer is one such job.
//! - [`TaskWorker`] drives a [`TaskExecutor`] through the claim, execute and
//!   report cycle for one task kind.

pub mod context;
pub mod error;
pub mod job;
pub mod reclaimer;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use job::Job;
pub use reclaimer::AbandonedTaskReclaimerJob;
pub use scheduler::JobScheduler;
pub use types::{JobOutput, TriggerSource};
pub use worker::{ExecutionError, TaskExecutor, TaskWorker, WorkerConfig};
