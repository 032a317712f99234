// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Integrations, datum stream mappings and datum streams.
//!
//! Only what the task queue depends on is stored: ownership, the parent
//! links and the `enabled` flags. Changing a flag cascades to the tasks under
//! it in the same transaction.

use chrono::Utc;
use cin_queue_core::{
	DatumStreamId, IntegrationId, MappingId, PollTask, RakeTask, TaskFilter, UserId,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::error::{DbError, Result};
use crate::queue::TaskQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
	pub user_id: UserId,
	pub id: IntegrationId,
	pub name: String,
	pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatumStreamMapping {
	pub user_id: UserId,
	pub id: MappingId,
	pub integration_id: IntegrationId,
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatumStream {
	pub user_id: UserId,
	pub id: DatumStreamId,
	/// Unmapped streams have no integration and are never re-enabled by a
	/// cascade.
	pub mapping_id: Option<MappingId>,
	pub name: String,
	pub enabled: bool,
}

/// Tasks whose state changed because of an enabled flag change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CascadeSummary {
	pub poll_tasks: u64,
	pub rake_tasks: u64,
}

impl CascadeSummary {
	pub fn total(&self) -> u64 {
		self.poll_tasks + self.rake_tasks
	}
}

#[derive(Clone)]
pub struct ConfigRepository {
	pool: SqlitePool,
}

async fn cascade(
	conn: &mut SqliteConnection,
	user_id: UserId,
	filter: &TaskFilter,
	enabled: bool,
) -> Result<CascadeSummary> {
	let now = Utc::now();
	let poll_tasks =
		TaskQueue::<PollTask>::cascade_enabled_status(conn, user_id, filter, enabled, now).await?;
	let rake_tasks =
		TaskQueue::<RakeTask>::cascade_enabled_status(conn, user_id, filter, enabled, now).await?;
	Ok(CascadeSummary {
		poll_tasks,
		rake_tasks,
	})
}

impl ConfigRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, name), fields(%user_id))]
	pub async fn create_integration(
		&self,
		user_id: UserId,
		name: &str,
		enabled: bool,
	) -> Result<IntegrationId> {
		let (id,): (i64,) = sqlx::query_as(
			"INSERT INTO cin_integration (user_id, name, enabled) VALUES (?, ?, ?) RETURNING id",
		)
		.bind(user_id.get())
		.bind(name)
		.bind(enabled)
		.fetch_one(&self.pool)
		.await?;
		Ok(IntegrationId(id))
	}

	#[tracing::instrument(skip(self), fields(%user_id, %id))]
	pub async fn get_integration(
		&self,
		user_id: UserId,
		id: IntegrationId,
	) -> Result<Option<Integration>> {
		let row: Option<(i64, String, bool)> = sqlx::query_as(
			"SELECT id, name, enabled FROM cin_integration WHERE user_id = ? AND id = ?",
		)
		.bind(user_id.get())
		.bind(id.get())
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(id, name, enabled)| Integration {
			user_id,
			id: IntegrationId(id),
			name,
			enabled,
		}))
	}

	/// # Errors
	/// `DbError::NotFound` if the integration does not exist for the user.
	#[tracing::instrument(skip(self, name), fields(%user_id, %integration_id))]
	pub async fn create_mapping(
		&self,
		user_id: UserId,
		integration_id: IntegrationId,
		name: &str,
	) -> Result<MappingId> {
		let row: Option<(i64,)> = sqlx::query_as(
			r#"
			INSERT INTO cin_datum_stream_map (user_id, int_id, name)
			SELECT user_id, id, ? FROM cin_integration WHERE user_id = ? AND id = ?
			RETURNING id
			"#,
		)
		.bind(name)
		.bind(user_id.get())
		.bind(integration_id.get())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|(id,)| MappingId(id))
			.ok_or_else(|| DbError::NotFound(format!("integration {integration_id}")))
	}

	#[tracing::instrument(skip(self), fields(%user_id, %id))]
	pub async fn get_mapping(
		&self,
		user_id: UserId,
		id: MappingId,
	) -> Result<Option<DatumStreamMapping>> {
		let row: Option<(i64, i64, String)> = sqlx::query_as(
			"SELECT id, int_id, name FROM cin_datum_stream_map WHERE user_id = ? AND id = ?",
		)
		.bind(user_id.get())
		.bind(id.get())
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(id, int_id, name)| DatumStreamMapping {
			user_id,
			id: MappingId(id),
			integration_id: IntegrationId(int_id),
			name,
		}))
	}

	/// # Errors
	/// `DbError::NotFound` if a mapping is given that does not exist for the
	/// user.
	#[tracing::instrument(skip(self, name), fields(%user_id, ?mapping_id))]
	pub async fn create_datum_stream(
		&self,
		user_id: UserId,
		mapping_id: Option<MappingId>,
		name: &str,
		enabled: bool,
	) -> Result<DatumStreamId> {
		if let Some(mapping_id) = mapping_id {
			if self.get_mapping(user_id, mapping_id).await?.is_none() {
				return Err(DbError::NotFound(format!("datum stream mapping {mapping_id}")));
			}
		}

		let (id,): (i64,) = sqlx::query_as(
			"INSERT INTO cin_datum_stream (user_id, map_id, name, enabled) VALUES (?, ?, ?, ?) RETURNING id",
		)
		.bind(user_id.get())
		.bind(mapping_id.map(|m| m.get()))
		.bind(name)
		.bind(enabled)
		.fetch_one(&self.pool)
		.await?;
		Ok(DatumStreamId(id))
	}

	#[tracing::instrument(skip(self), fields(%user_id, %id))]
	pub async fn get_datum_stream(
		&self,
		user_id: UserId,
		id: DatumStreamId,
	) -> Result<Option<DatumStream>> {
		let row: Option<(i64, Option<i64>, String, bool)> = sqlx::query_as(
			"SELECT id, map_id, name, enabled FROM cin_datum_stream WHERE user_id = ? AND id = ?",
		)
		.bind(user_id.get())
		.bind(id.get())
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(id, map_id, name, enabled)| DatumStream {
			user_id,
			id: DatumStreamId(id),
			mapping_id: map_id.map(MappingId),
			name,
			enabled,
		}))
	}

	/// Set an integration's flag and park or unpark every task under it.
	///
	/// # Errors
	/// `DbError::NotFound` if the integration does not exist for the user.
	#[tracing::instrument(skip(self), fields(%user_id, %id))]
	pub async fn set_integration_enabled(
		&self,
		user_id: UserId,
		id: IntegrationId,
		enabled: bool,
	) -> Result<CascadeSummary> {
		let mut tx = self.pool.begin().await?;

		let result =
			sqlx::query("UPDATE cin_integration SET enabled = ? WHERE user_id = ? AND id = ?")
				.bind(enabled)
				.bind(user_id.get())
				.bind(id.get())
				.execute(&mut *tx)
				.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("integration {id}")));
		}

		let filter = TaskFilter::default().with_integrations([id]);
		let summary = cascade(&mut tx, user_id, &filter, enabled).await?;
		tx.commit().await?;

		tracing::info!(
			poll_tasks = summary.poll_tasks,
			rake_tasks = summary.rake_tasks,
			"integration enabled status changed"
		);
		Ok(summary)
	}

	/// Set a datum stream's flag and park or unpark its tasks. Unparking only
	/// happens if the stream's integration is enabled too.
	///
	/// # Errors
	/// `DbError::NotFound` if the datum stream does not exist for the user.
	#[tracing::instrument(skip(self), fields(%user_id, %id))]
	pub async fn set_datum_stream_enabled(
		&self,
		user_id: UserId,
		id: DatumStreamId,
		enabled: bool,
	) -> Result<CascadeSummary> {
		let mut tx = self.pool.begin().await?;

		let result =
			sqlx::query("UPDATE cin_datum_stream SET enabled = ? WHERE user_id = ? AND id = ?")
				.bind(enabled)
				.bind(user_id.get())
				.bind(id.get())
				.execute(&mut *tx)
				.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("datum stream {id}")));
		}

		let filter = TaskFilter::default().with_datum_streams([id]);
		let summary = cascade(&mut tx, user_id, &filter, enabled).await?;
		tx.commit().await?;

		tracing::info!(
			poll_tasks = summary.poll_tasks,
			rake_tasks = summary.rake_tasks,
			"datum stream enabled status changed"
		);
		Ok(summary)
	}

	/// Delete an integration with its mappings, datum streams and tasks.
	#[tracing::instrument(skip(self), fields(%user_id, %id))]
	pub async fn delete_integration(&self, user_id: UserId, id: IntegrationId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM cin_integration WHERE user_id = ? AND id = ?")
			.bind(user_id.get())
			.bind(id.get())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Delete a datum stream with its tasks.
	#[tracing::instrument(skip(self), fields(%user_id, %id))]
	pub async fn delete_datum_stream(&self, user_id: UserId, id: DatumStreamId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM cin_datum_stream WHERE user_id = ? AND id = ?")
			.bind(user_id.get())
			.bind(id.get())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}
}
