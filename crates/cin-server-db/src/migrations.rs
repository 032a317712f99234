// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::error::Result;

const MIGRATIONS: &[(&str, &str)] = &[
	(
		"001_create_cin_config",
		include_str!("../migrations/001_create_cin_config.sql"),
	),
	(
		"002_create_cin_tasks",
		include_str!("../migrations/002_create_cin_tasks.sql"),
	),
];

/// Apply the schema. Every statement is idempotent, so this runs on each
/// startup.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

	for (name, sql) in MIGRATIONS {
		for statement in sql.split(';') {
			let statement = statement.trim();
			if statement.is_empty() {
				continue;
			}
			sqlx::query(statement).execute(pool).await?;
		}
		tracing::debug!(migration = name, "migration applied");
	}

	tracing::info!(count = MIGRATIONS.len(), "database migrations complete");
	Ok(())
}
