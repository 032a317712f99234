// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Claimable task store.
//!
//! One generic implementation serves both task kinds. Every mutating operation
//! is a single SQL statement, so SQLite's database write lock makes it atomic
//! with respect to every other writer: two workers claiming at once are
//! serialized and the second sees the first one's claim.

use chrono::{DateTime, Utc};
use cin_queue_core::{ClaimableTask, TaskFilter, TaskOutcome, TaskState, UserId};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::QueryBuilder;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::error::{DbError, Result};
use crate::table::{enabled_ancestors, TaskTable};

pub struct TaskQueue<T> {
	pool: SqlitePool,
	kind: PhantomData<fn() -> T>,
}

pub type PollTaskQueue = TaskQueue<cin_queue_core::PollTask>;
pub type RakeTaskQueue = TaskQueue<cin_queue_core::RakeTask>;

impl<T> Clone for TaskQueue<T> {
	fn clone(&self) -> Self {
		Self {
			pool: self.pool.clone(),
			kind: PhantomData,
		}
	}
}

/// Appends ` AND ...` clauses for every populated filter criterion. Limit and
/// offset are left to the caller.
fn push_filter<T: TaskTable>(builder: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
	if let Some(user_id) = filter.user_id {
		builder.push(" AND user_id = ").push_bind(user_id.get());
	}

	if !filter.datum_stream_ids.is_empty() {
		builder.push(" AND ds_id IN (");
		let mut ids = builder.separated(", ");
		for id in &filter.datum_stream_ids {
			ids.push_bind(id.get());
		}
		ids.push_unseparated(")");
	}

	if !filter.integration_ids.is_empty() {
		builder.push(format!(
			" AND ds_id IN (SELECT ds.id FROM cin_datum_stream ds \
			JOIN cin_datum_stream_map m ON m.id = ds.map_id \
			WHERE ds.user_id = {table}.user_id AND m.int_id IN (",
			table = T::TABLE
		));
		let mut ids = builder.separated(", ");
		for id in &filter.integration_ids {
			ids.push_bind(id.get());
		}
		ids.push_unseparated("))");
	}

	if !filter.task_ids.is_empty() {
		match T::TASK_ID_COLUMN {
			Some(column) => {
				builder.push(format!(" AND {column} IN ("));
				let mut ids = builder.separated(", ");
				for id in &filter.task_ids {
					ids.push_bind(id.get());
				}
				ids.push_unseparated(")");
			}
			// Asking for specific generated ids of a kind that has none.
			None => {
				builder.push(" AND 0 = 1");
			}
		}
	}

	if !filter.states.is_empty() {
		builder.push(" AND status IN (");
		let mut states = builder.separated(", ");
		for state in &filter.states {
			states.push_bind(state.code());
		}
		states.push_unseparated(")");
	}
}

/// Pushes the value assigned to `status`. `Queued` only sticks while the
/// task's datum stream and integration are both enabled; otherwise the task
/// is parked as `Completed`.
fn push_status<T: TaskTable>(builder: &mut QueryBuilder<'_, Sqlite>, state: TaskState) {
	if state != TaskState::Queued {
		builder.push_bind(state.code());
		return;
	}
	builder
		.push(format!("CASE WHEN {} THEN ", enabled_ancestors(T::TABLE)))
		.push_bind(TaskState::Queued.code())
		.push(" ELSE ")
		.push_bind(TaskState::Completed.code())
		.push(" END");
}

fn write_error<T: TaskTable>(err: sqlx::Error, task: &T) -> DbError {
	match &err {
		sqlx::Error::Database(db) if db.is_unique_violation() => {
			DbError::Conflict(format!("{} task {} already exists", T::KIND, task.key()))
		}
		sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
			DbError::NotFound(format!("datum stream {}", task.datum_stream_id()))
		}
		_ => DbError::Sqlx(err),
	}
}

impl<T: TaskTable> TaskQueue<T> {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			kind: PhantomData,
		}
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Insert a new task and return its key. Rake tasks get their id here.
	///
	/// # Errors
	/// `DbError::Conflict` if a poll task already exists for the datum stream,
	/// `DbError::NotFound` if the datum stream does not exist.
	#[tracing::instrument(skip(self, task), fields(kind = T::KIND, ds_id = %task.datum_stream_id()))]
	pub async fn create(&self, task: &T) -> Result<T::Key> {
		let mut builder = QueryBuilder::new("");
		T::push_insert(&mut builder, task)?;
		let row = builder
			.build()
			.fetch_one(&self.pool)
			.await
			.map_err(|e| write_error(e, task))?;
		let key = T::key_from_row(&row)?;
		tracing::debug!(%key, "task created");
		Ok(key)
	}

	#[tracing::instrument(skip(self), fields(kind = T::KIND, %key))]
	pub async fn get(&self, key: T::Key) -> Result<Option<T>> {
		let mut builder = QueryBuilder::new(format!("SELECT {} FROM {} WHERE ", T::COLUMNS, T::TABLE));
		T::push_key_predicate(&mut builder, key);
		let row = builder
			.build_query_as::<T::Row>()
			.fetch_optional(&self.pool)
			.await?;
		row.map(T::from_row).transpose()
	}

	/// Insert or fully replace a task's mutable fields. No transition check is
	/// made.
	#[tracing::instrument(skip(self, task), fields(kind = T::KIND, key = %task.key()))]
	pub async fn save(&self, task: &T) -> Result<T::Key> {
		let mut builder = QueryBuilder::new("");
		T::push_upsert(&mut builder, task)?;
		let row = builder
			.build()
			.fetch_optional(&self.pool)
			.await
			.map_err(|e| write_error(e, task))?;
		match row {
			Some(row) => T::key_from_row(&row),
			None => Err(DbError::Conflict(format!(
				"{} task {} belongs to another user",
				T::KIND,
				task.key()
			))),
		}
	}

	#[tracing::instrument(skip(self), fields(kind = T::KIND, %key))]
	pub async fn delete(&self, key: T::Key) -> Result<bool> {
		let mut builder = QueryBuilder::new(format!("DELETE FROM {} WHERE ", T::TABLE));
		T::push_key_predicate(&mut builder, key);
		let result = builder.build().execute(&self.pool).await?;
		Ok(result.rows_affected() > 0)
	}

	/// Tasks matching every populated criterion, ordered by user, datum stream
	/// and insertion order.
	#[tracing::instrument(skip(self, filter), fields(kind = T::KIND))]
	pub async fn find_filtered(&self, filter: &TaskFilter) -> Result<Vec<T>> {
		let mut builder =
			QueryBuilder::new(format!("SELECT {} FROM {} WHERE 1 = 1", T::COLUMNS, T::TABLE));
		push_filter::<T>(&mut builder, filter);
		builder.push(" ORDER BY user_id, ds_id, rowid");

		match filter.limit {
			Some(limit) => {
				builder
					.push(" LIMIT ")
					.push_bind(i64::from(limit))
					.push(" OFFSET ")
					.push_bind(i64::from(filter.offset));
			}
			None if filter.offset > 0 => {
				builder
					.push(" LIMIT -1 OFFSET ")
					.push_bind(i64::from(filter.offset));
			}
			None => {}
		}

		let rows = builder
			.build_query_as::<T::Row>()
			.fetch_all(&self.pool)
			.await?;
		rows.into_iter().map(T::from_row).collect()
	}

	/// Delete every task matching the filter. Limit and offset are ignored.
	///
	/// # Errors
	/// `DbError::Internal` if the filter names no user.
	#[tracing::instrument(skip(self, filter), fields(kind = T::KIND, user_id = ?filter.user_id))]
	pub async fn delete_filtered(&self, filter: &TaskFilter) -> Result<u64> {
		if filter.user_id.is_none() {
			return Err(DbError::Internal(
				"bulk task delete requires a user id".to_string(),
			));
		}

		let mut builder = QueryBuilder::new(format!("DELETE FROM {} WHERE 1 = 1", T::TABLE));
		push_filter::<T>(&mut builder, filter);
		let result = builder.build().execute(&self.pool).await?;
		tracing::debug!(deleted = result.rows_affected(), "tasks deleted");
		Ok(result.rows_affected())
	}

	/// Number of tasks in each state, optionally for one user. States with no
	/// tasks are omitted.
	#[tracing::instrument(skip(self), fields(kind = T::KIND))]
	pub async fn count_by_state(&self, user_id: Option<UserId>) -> Result<BTreeMap<TaskState, u64>> {
		let mut builder =
			QueryBuilder::new(format!("SELECT status, COUNT(*) FROM {} WHERE 1 = 1", T::TABLE));
		if let Some(user_id) = user_id {
			builder.push(" AND user_id = ").push_bind(user_id.get());
		}
		builder.push(" GROUP BY status");
		let rows = builder
			.build_query_as::<(String, i64)>()
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter()
			.map(|(code, count)| -> Result<(TaskState, u64)> {
				let state = TaskState::from_code(&code)?;
				Ok((state, u64::try_from(count).unwrap_or(0)))
			})
			.collect()
	}

	/// Claim the due queued task with the earliest execution time whose datum
	/// stream has no claimed or executing task.
	pub async fn claim_queued_task(&self) -> Result<Option<T>> {
		self.claim_queued_task_at(Utc::now()).await
	}

	/// [`claim_queued_task`](Self::claim_queued_task) with an explicit clock.
	///
	/// The candidate selection and the state change are one `UPDATE`. Ties on
	/// execution time go to the task inserted first.
	#[tracing::instrument(skip(self), fields(kind = T::KIND))]
	pub async fn claim_queued_task_at(&self, now: DateTime<Utc>) -> Result<Option<T>> {
		let key_columns = T::KEY_COLUMNS.join(", ");
		let candidate_columns = T::KEY_COLUMNS
			.iter()
			.map(|column| format!("t.{column}"))
			.collect::<Vec<_>>()
			.join(", ");
		let sql = format!(
			r#"
			UPDATE {table}
			SET status = '{claimed}'
			WHERE ({key_columns}) IN (
				SELECT {candidate_columns}
				FROM {table} AS t
				WHERE t.status = '{queued}'
					AND t.exec_at <= ?
					AND NOT EXISTS (
						SELECT 1 FROM {table} AS a
						WHERE a.user_id = t.user_id
							AND a.ds_id = t.ds_id
							AND a.status IN ('{claimed}', '{executing}')
					)
				ORDER BY t.exec_at, t.rowid
				LIMIT 1
			)
			AND status = '{queued}'
			RETURNING {columns}
			"#,
			table = T::TABLE,
			columns = T::COLUMNS,
			queued = TaskState::Queued.code(),
			claimed = TaskState::Claimed.code(),
			executing = TaskState::Executing.code(),
		);

		let row = sqlx::query_as::<_, T::Row>(&sql)
			.bind(now)
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => {
				let task = T::from_row(row)?;
				tracing::debug!(key = %task.key(), ds_id = %task.datum_stream_id(), "task claimed");
				Ok(Some(task))
			}
			None => Ok(None),
		}
	}

	/// Write every mutable field of `task`. With `expected`, the write only
	/// happens if the stored state still equals it, and a state change must be
	/// a legal transition. A `Queued` task under a disabled datum stream or
	/// integration is stored as `Completed`.
	///
	/// Returns whether a row was written.
	#[tracing::instrument(skip(self, task), fields(kind = T::KIND, key = %task.key(), state = %task.state()))]
	pub async fn update_task(&self, task: &T, expected: Option<TaskState>) -> Result<bool> {
		Ok(self.write_task(task, expected).await?.is_some())
	}

	/// [`update_task`](Self::update_task), returning the state actually stored.
	async fn write_task(&self, task: &T, expected: Option<TaskState>) -> Result<Option<TaskState>> {
		if let Some(prior) = expected {
			if prior != task.state() {
				prior.ensure_transition(task.state())?;
			}
		}

		let mut builder = QueryBuilder::new(format!("UPDATE {} SET status = ", T::TABLE));
		push_status::<T>(&mut builder, task.state());
		builder.push(", ");
		T::push_assignments(&mut builder, task)?;
		builder.push(" WHERE ");
		T::push_key_predicate(&mut builder, task.key());
		if let Some(prior) = expected {
			builder.push(" AND status = ").push_bind(prior.code());
		}
		builder.push(" RETURNING status");

		let stored = builder
			.build_query_as::<(String,)>()
			.fetch_optional(&self.pool)
			.await?;
		match stored {
			Some((code,)) => Ok(Some(TaskState::from_code(&code)?)),
			None => {
				tracing::debug!(?expected, "task not updated");
				Ok(None)
			}
		}
	}

	/// Set only the state. With `expected`, the change must be a legal
	/// transition and only applies if the stored state still equals it.
	#[tracing::instrument(skip(self), fields(kind = T::KIND, %key))]
	pub async fn update_task_state(
		&self,
		key: T::Key,
		state: TaskState,
		expected: Option<TaskState>,
	) -> Result<bool> {
		if let Some(prior) = expected {
			prior.ensure_transition(state)?;
		}

		let mut builder = QueryBuilder::new(format!("UPDATE {} SET status = ", T::TABLE));
		push_status::<T>(&mut builder, state);
		builder.push(" WHERE ");
		T::push_key_predicate(&mut builder, key);
		if let Some(prior) = expected {
			builder.push(" AND status = ").push_bind(prior.code());
		}

		let result = builder.build().execute(&self.pool).await?;
		Ok(result.rows_affected() > 0)
	}

	/// Move a claimed task to `Executing`.
	pub async fn start_executing(&self, key: T::Key) -> Result<bool> {
		self.update_task_state(key, TaskState::Executing, Some(TaskState::Claimed))
			.await
	}

	/// Record the result of running `task`, which must be the copy handed out
	/// by a claim (claimed or executing). Returns `false` if the stored task
	/// has moved on since, for example because it was reset as abandoned.
	#[tracing::instrument(skip(self, task, outcome), fields(kind = T::KIND, key = %task.key()))]
	pub async fn report(&self, task: &T, outcome: &TaskOutcome) -> Result<bool> {
		let prior = task.state();
		prior.ensure_transition(outcome.next_state())?;

		let mut updated = task.clone();
		outcome.apply_to(&mut updated);
		match self.write_task(&updated, Some(prior)).await? {
			Some(stored) if stored != updated.state() => {
				tracing::info!(
					state = %updated.state(),
					%stored,
					"task parked, its datum stream or integration is disabled"
				);
				Ok(true)
			}
			Some(stored) => {
				tracing::debug!(state = %stored, "task outcome recorded");
				Ok(true)
			}
			None => {
				tracing::warn!(%prior, "task changed state before its outcome was recorded");
				Ok(false)
			}
		}
	}

	/// Delete the task only if it is still in `expected`.
	#[tracing::instrument(skip(self), fields(kind = T::KIND, %key, %expected))]
	pub async fn delete_if_state(&self, key: T::Key, expected: TaskState) -> Result<bool> {
		let mut builder = QueryBuilder::new(format!("DELETE FROM {} WHERE ", T::TABLE));
		T::push_key_predicate(&mut builder, key);
		builder.push(" AND status = ").push_bind(expected.code());
		let result = builder.build().execute(&self.pool).await?;
		Ok(result.rows_affected() > 0)
	}

	/// Return claimed or executing tasks whose execution time is before
	/// `older_than` to `Queued`, or park them as `Completed` if their datum
	/// stream or integration has been disabled meanwhile.
	///
	/// Liveness is judged on `exec_at` alone, so `older_than` must leave more
	/// room than the longest expected run.
	#[tracing::instrument(skip(self), fields(kind = T::KIND, %older_than))]
	pub async fn reset_abandoned_executing_tasks(&self, older_than: DateTime<Utc>) -> Result<u64> {
		let mut builder = QueryBuilder::new(format!("UPDATE {} SET status = ", T::TABLE));
		push_status::<T>(&mut builder, TaskState::Queued);
		builder
			.push(" WHERE status IN (")
			.push_bind(TaskState::Claimed.code())
			.push(", ")
			.push_bind(TaskState::Executing.code())
			.push(") AND exec_at < ")
			.push_bind(older_than);
		let result = builder.build().execute(&self.pool).await?;

		let reset = result.rows_affected();
		if reset > 0 {
			tracing::info!(reset, "abandoned tasks returned to queue");
		}
		Ok(reset)
	}

	/// Park (`enabled = false`) or unpark (`enabled = true`) the user's tasks
	/// matching `filter`.
	///
	/// Parking moves `Queued` tasks to `Completed`. Unparking moves `Completed`
	/// tasks back to `Queued` with an execution time of now, but only where
	/// both the datum stream and its integration are enabled. Claimed and
	/// executing tasks are never touched. The filter's states, limit and offset
	/// are ignored.
	///
	/// Unparking cannot tell a parked task from one that finished or failed, so
	/// enabling also replays rake tasks kept after completion when
	/// `delete_completed_rake_tasks` is off.
	#[tracing::instrument(skip(self, filter), fields(kind = T::KIND, %user_id))]
	pub async fn update_enabled_status(
		&self,
		user_id: UserId,
		filter: &TaskFilter,
		enabled: bool,
	) -> Result<u64> {
		let mut conn = self.pool.acquire().await?;
		Self::cascade_enabled_status(&mut conn, user_id, filter, enabled, Utc::now()).await
	}

	/// [`update_enabled_status`](Self::update_enabled_status) on a caller's
	/// connection, so it can share a transaction with the flag change.
	pub(crate) async fn cascade_enabled_status(
		conn: &mut SqliteConnection,
		user_id: UserId,
		filter: &TaskFilter,
		enabled: bool,
		now: DateTime<Utc>,
	) -> Result<u64> {
		let mut builder = QueryBuilder::new(format!("UPDATE {} SET status = ", T::TABLE));
		if enabled {
			builder
				.push_bind(TaskState::Queued.code())
				.push(", exec_at = ")
				.push_bind(now)
				.push(" WHERE status = ")
				.push_bind(TaskState::Completed.code());
			builder.push(format!(" AND {}", enabled_ancestors(T::TABLE)));
		} else {
			builder
				.push_bind(TaskState::Completed.code())
				.push(" WHERE status = ")
				.push_bind(TaskState::Queued.code());
		}

		let scoped = TaskFilter {
			user_id: Some(user_id),
			states: Vec::new(),
			limit: None,
			offset: 0,
			..filter.clone()
		};
		push_filter::<T>(&mut builder, &scoped);

		let result = builder.build().execute(&mut *conn).await?;
		let changed = result.rows_affected();
		tracing::debug!(kind = T::KIND, %user_id, enabled, changed, "task enabled status cascaded");
		Ok(changed)
	}
}
