// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use cin_queue_core::{DatumStreamId, IntegrationId, MappingId, UserId};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::config::ConfigRepository;
use crate::migrations::run_migrations;
use crate::pool::create_pool;

/// Single-connection in-memory pool. Each call is a fresh database.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.unwrap()
}

pub async fn create_queue_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	run_migrations(&pool).await.unwrap();
	pool
}

/// File-backed pool for tests that need several connections writing at once.
pub async fn create_file_test_pool(dir: &Path, max_connections: u32) -> SqlitePool {
	let url = format!("sqlite:{}", dir.join("queue.db").display());
	let pool = create_pool(&url, max_connections).await.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

#[derive(Debug, Clone, Copy)]
pub struct SeededStream {
	pub user_id: UserId,
	pub integration_id: IntegrationId,
	pub mapping_id: MappingId,
	pub datum_stream_id: DatumStreamId,
}

/// Enabled integration, mapping and datum stream for `user_id`.
pub async fn seed_datum_stream(pool: &SqlitePool, user_id: UserId) -> SeededStream {
	let repo = ConfigRepository::new(pool.clone());
	let integration_id = repo
		.create_integration(user_id, "test integration", true)
		.await
		.unwrap();
	let mapping_id = repo
		.create_mapping(user_id, integration_id, "test mapping")
		.await
		.unwrap();
	let datum_stream_id = repo
		.create_datum_stream(user_id, Some(mapping_id), "test stream", true)
		.await
		.unwrap();
	SeededStream {
		user_id,
		integration_id,
		mapping_id,
		datum_stream_id,
	}
}

/// Another enabled datum stream under an existing mapping.
pub async fn seed_sibling_stream(pool: &SqlitePool, seeded: &SeededStream) -> DatumStreamId {
	ConfigRepository::new(pool.clone())
		.create_datum_stream(seeded.user_id, Some(seeded.mapping_id), "sibling stream", true)
		.await
		.unwrap()
}
