//! Postgres-backed [`MigrationStore`].
//!
//! Applied versions live in `_notes_migrations`. The store holds one pooled
//! connection for its whole life so that the session-level advisory lock taken
//! in [`lock`](MigrationStore::lock) is released by the same session.

use sqlx::{Postgres, pool::PoolConnection};
use tonic::async_trait;
use tower::BoxError;

use super::{Migration, MigrationStore};
use crate::server::database::Database;

/// Advisory lock key shared by every replica running migrations.
const MIGRATION_LOCK_KEY: i64 = 0x6e6f_7465_735f_6d67;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _notes_migrations (
        version    BIGINT PRIMARY KEY,
        name       TEXT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

pub struct PostgresMigrationStore {
    conn: PoolConnection<Postgres>,
}

impl PostgresMigrationStore {
    /// Checks out a dedicated connection from `database`.
    pub async fn acquire(database: &Database) -> Result<Self, sqlx::Error> {
        let conn = database.pool().acquire().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl MigrationStore for PostgresMigrationStore {
    async fn prepare(&mut self) -> Result<(), BoxError> {
        sqlx::query(CREATE_TABLE).execute(&mut *self.conn).await?;
        Ok(())
    }

    async fn current_version(&mut self) -> Result<Option<i64>, BoxError> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM _notes_migrations")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(version)
    }

    async fn apply(&mut self, migration: &Migration) -> Result<(), BoxError> {
        // Dropping the transaction before commit (error or timeout) rolls it
        // back, so the bookkeeping row never outlives a failed script.
        let mut tx = sqlx::Connection::begin(&mut *self.conn).await?;

        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&migration.sql)).await?;
        sqlx::query("INSERT INTO _notes_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(&migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn lock(&mut self) -> Result<(), BoxError> {
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn unlock(&mut self) -> Result<(), BoxError> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
