// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Row mapping for each task kind.
//!
//! [`TaskQueue`](crate::TaskQueue) is written once against [`TaskTable`]; the
//! impls here supply the table name, key columns and column bindings.

use chrono::{DateTime, Utc};
use cin_queue_core::{
	ClaimableTask, DatumStreamId, PollTask, PollTaskKey, RakeTask, RakeTaskKey, ServiceProperties,
	TaskId, TaskState, UserId,
};
use sqlx::query_builder::Separated;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{FromRow, QueryBuilder, Row};
use std::fmt::Display;
use std::time::Duration;

use crate::error::{DbError, Result};

pub trait TaskTable: ClaimableTask + Unpin {
	/// Short name used in logs and errors.
	const KIND: &'static str;
	const TABLE: &'static str;
	/// Full column list, in the order `Row` expects.
	const COLUMNS: &'static str;
	const KEY_COLUMNS: &'static [&'static str];
	/// Column matched by [`TaskFilter::task_ids`](cin_queue_core::TaskFilter),
	/// if this kind has generated ids.
	const TASK_ID_COLUMN: Option<&'static str>;

	type Row: for<'r> FromRow<'r, SqliteRow> + Send + Unpin;

	fn from_row(row: Self::Row) -> Result<Self>;

	fn key_from_row(row: &SqliteRow) -> Result<Self::Key>;

	/// Pushes `col = ? AND col = ?` for the key.
	fn push_key_predicate(builder: &mut QueryBuilder<'_, Sqlite>, key: Self::Key);

	/// Pushes a complete `INSERT ... RETURNING <key columns>`.
	fn push_insert(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()>;

	/// Pushes an insert-or-replace of every mutable column, returning the key.
	/// Returns no row when the key exists under a different owner.
	fn push_upsert(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()>;

	/// Pushes `col = ?, ...` for every mutable column except `status`.
	fn push_assignments(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()>;
}

const ENABLED_ANCESTORS: &str = "SELECT 1 FROM cin_datum_stream ds \
	JOIN cin_datum_stream_map m ON m.id = ds.map_id \
	JOIN cin_integration i ON i.id = m.int_id \
	WHERE ds.enabled = 1 AND i.enabled = 1";

/// `EXISTS (...)` over the datum stream and integration of the `table` row
/// being written both being enabled.
pub(crate) fn enabled_ancestors(table: &str) -> String {
	format!(
		"EXISTS ({} AND ds.id = {table}.ds_id AND ds.user_id = {table}.user_id)",
		ENABLED_ANCESTORS
	)
}

/// Pushes the inserted `status` value. A task created `Queued` under a
/// disabled datum stream or integration is stored parked as `Completed`.
fn push_status_value<Sep: Display>(
	values: &mut Separated<'_, '_, Sqlite, Sep>,
	user_id: UserId,
	datum_stream_id: DatumStreamId,
	state: TaskState,
) {
	if state != TaskState::Queued {
		values.push_bind(state.code());
		return;
	}
	values.push(format!("CASE WHEN EXISTS ({ENABLED_ANCESTORS} AND ds.id = "));
	values.push_bind_unseparated(datum_stream_id.get());
	values.push_unseparated(" AND ds.user_id = ");
	values.push_bind_unseparated(user_id.get());
	values.push_unseparated(") THEN ");
	values.push_bind_unseparated(TaskState::Queued.code());
	values.push_unseparated(" ELSE ");
	values.push_bind_unseparated(TaskState::Completed.code());
	values.push_unseparated(" END");
}

fn encode_props(props: &Option<ServiceProperties>) -> Result<Option<String>> {
	props
		.as_ref()
		.map(serde_json::to_string)
		.transpose()
		.map_err(DbError::from)
}

fn decode_props(props: Option<String>) -> Result<Option<ServiceProperties>> {
	props
		.map(|json| serde_json::from_str(&json))
		.transpose()
		.map_err(DbError::from)
}

fn offset_secs(offset: Duration) -> Result<i64> {
	i64::try_from(offset.as_secs())
		.map_err(|_| DbError::Internal(format!("rake offset out of range: {offset:?}")))
}

#[derive(Debug, FromRow)]
pub struct PollTaskRow {
	user_id: i64,
	ds_id: i64,
	status: String,
	exec_at: DateTime<Utc>,
	start_at: DateTime<Utc>,
	message: Option<String>,
	sprops: Option<String>,
}

impl TaskTable for PollTask {
	const KIND: &'static str = "poll";
	const TABLE: &'static str = "cin_datum_stream_poll_task";
	const COLUMNS: &'static str = "user_id, ds_id, status, exec_at, start_at, message, sprops";
	const KEY_COLUMNS: &'static [&'static str] = &["user_id", "ds_id"];
	const TASK_ID_COLUMN: Option<&'static str> = None;

	type Row = PollTaskRow;

	fn from_row(row: PollTaskRow) -> Result<Self> {
		Ok(PollTask {
			user_id: UserId(row.user_id),
			datum_stream_id: DatumStreamId(row.ds_id),
			state: TaskState::from_code(&row.status)?,
			execute_at: row.exec_at,
			start_at: row.start_at,
			message: row.message,
			service_props: decode_props(row.sprops)?,
		})
	}

	fn key_from_row(row: &SqliteRow) -> Result<PollTaskKey> {
		Ok(PollTaskKey {
			user_id: UserId(row.try_get("user_id")?),
			datum_stream_id: DatumStreamId(row.try_get("ds_id")?),
		})
	}

	fn push_key_predicate(builder: &mut QueryBuilder<'_, Sqlite>, key: PollTaskKey) {
		builder
			.push("user_id = ")
			.push_bind(key.user_id.get())
			.push(" AND ds_id = ")
			.push_bind(key.datum_stream_id.get());
	}

	fn push_insert(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()> {
		let sprops = encode_props(&task.service_props)?;
		builder.push(
			"INSERT INTO cin_datum_stream_poll_task (user_id, ds_id, status, exec_at, start_at, message, sprops) VALUES (",
		);
		let mut values = builder.separated(", ");
		values
			.push_bind(task.user_id.get())
			.push_bind(task.datum_stream_id.get());
		push_status_value(&mut values, task.user_id, task.datum_stream_id, task.state);
		values
			.push_bind(task.execute_at)
			.push_bind(task.start_at)
			.push_bind(task.message.clone())
			.push_bind(sprops);
		values.push_unseparated(") RETURNING user_id, ds_id");
		Ok(())
	}

	fn push_upsert(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()> {
		let sprops = encode_props(&task.service_props)?;
		builder.push(
			"INSERT INTO cin_datum_stream_poll_task (user_id, ds_id, status, exec_at, start_at, message, sprops) VALUES (",
		);
		let mut values = builder.separated(", ");
		values
			.push_bind(task.user_id.get())
			.push_bind(task.datum_stream_id.get());
		push_status_value(&mut values, task.user_id, task.datum_stream_id, task.state);
		values
			.push_bind(task.execute_at)
			.push_bind(task.start_at)
			.push_bind(task.message.clone())
			.push_bind(sprops);
		values.push_unseparated(
			r#") ON CONFLICT (user_id, ds_id) DO UPDATE SET
				status = excluded.status,
				exec_at = excluded.exec_at,
				start_at = excluded.start_at,
				message = excluded.message,
				sprops = excluded.sprops
			RETURNING user_id, ds_id"#,
		);
		Ok(())
	}

	fn push_assignments(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()> {
		let sprops = encode_props(&task.service_props)?;
		builder
			.push("exec_at = ")
			.push_bind(task.execute_at)
			.push(", start_at = ")
			.push_bind(task.start_at)
			.push(", message = ")
			.push_bind(task.message.clone())
			.push(", sprops = ")
			.push_bind(sprops);
		Ok(())
	}
}

#[derive(Debug, FromRow)]
pub struct RakeTaskRow {
	id: i64,
	user_id: i64,
	ds_id: i64,
	status: String,
	exec_at: DateTime<Utc>,
	start_offset: i64,
	message: Option<String>,
	sprops: Option<String>,
}

impl TaskTable for RakeTask {
	const KIND: &'static str = "rake";
	const TABLE: &'static str = "cin_datum_stream_rake_task";
	const COLUMNS: &'static str = "id, user_id, ds_id, status, exec_at, start_offset, message, sprops";
	const KEY_COLUMNS: &'static [&'static str] = &["id"];
	const TASK_ID_COLUMN: Option<&'static str> = Some("id");

	type Row = RakeTaskRow;

	fn from_row(row: RakeTaskRow) -> Result<Self> {
		let offset = u64::try_from(row.start_offset).map_err(|_| {
			DbError::Internal(format!(
				"negative start_offset {} on rake task {}",
				row.start_offset, row.id
			))
		})?;
		Ok(RakeTask {
			user_id: UserId(row.user_id),
			id: TaskId(row.id),
			datum_stream_id: DatumStreamId(row.ds_id),
			state: TaskState::from_code(&row.status)?,
			execute_at: row.exec_at,
			offset: Duration::from_secs(offset),
			message: row.message,
			service_props: decode_props(row.sprops)?,
		})
	}

	fn key_from_row(row: &SqliteRow) -> Result<RakeTaskKey> {
		Ok(RakeTaskKey {
			user_id: UserId(row.try_get("user_id")?),
			task_id: TaskId(row.try_get("id")?),
		})
	}

	fn push_key_predicate(builder: &mut QueryBuilder<'_, Sqlite>, key: RakeTaskKey) {
		builder
			.push("user_id = ")
			.push_bind(key.user_id.get())
			.push(" AND id = ")
			.push_bind(key.task_id.get());
	}

	fn push_insert(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()> {
		let sprops = encode_props(&task.service_props)?;
		builder.push(
			"INSERT INTO cin_datum_stream_rake_task (user_id, ds_id, status, exec_at, start_offset, message, sprops) VALUES (",
		);
		let mut values = builder.separated(", ");
		values
			.push_bind(task.user_id.get())
			.push_bind(task.datum_stream_id.get());
		push_status_value(&mut values, task.user_id, task.datum_stream_id, task.state);
		values
			.push_bind(task.execute_at)
			.push_bind(offset_secs(task.offset)?)
			.push_bind(task.message.clone())
			.push_bind(sprops);
		values.push_unseparated(") RETURNING user_id, id");
		Ok(())
	}

	fn push_upsert(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()> {
		if task.id.get() <= 0 {
			return Self::push_insert(builder, task);
		}

		let sprops = encode_props(&task.service_props)?;
		builder.push(
			"INSERT INTO cin_datum_stream_rake_task (id, user_id, ds_id, status, exec_at, start_offset, message, sprops) VALUES (",
		);
		let mut values = builder.separated(", ");
		values
			.push_bind(task.id.get())
			.push_bind(task.user_id.get())
			.push_bind(task.datum_stream_id.get());
		push_status_value(&mut values, task.user_id, task.datum_stream_id, task.state);
		values
			.push_bind(task.execute_at)
			.push_bind(offset_secs(task.offset)?)
			.push_bind(task.message.clone())
			.push_bind(sprops);
		values.push_unseparated(
			r#") ON CONFLICT (id) DO UPDATE SET
				status = excluded.status,
				exec_at = excluded.exec_at,
				start_offset = excluded.start_offset,
				message = excluded.message,
				sprops = excluded.sprops
			WHERE cin_datum_stream_rake_task.user_id = excluded.user_id
			RETURNING user_id, id"#,
		);
		Ok(())
	}

	fn push_assignments(builder: &mut QueryBuilder<'_, Sqlite>, task: &Self) -> Result<()> {
		let sprops = encode_props(&task.service_props)?;
		builder
			.push("exec_at = ")
			.push_bind(task.execute_at)
			.push(", start_offset = ")
			.push_bind(offset_secs(task.offset)?)
			.push(", message = ")
			.push_bind(task.message.clone())
			.push(", sprops = ")
			.push_bind(sprops);
		Ok(())
	}
}
