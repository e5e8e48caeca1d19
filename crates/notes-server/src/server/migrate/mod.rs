//! Versioned schema migrations.
//!
//! Migrations are plain SQL files named `<version>_<name>.sql` in a single
//! directory. [`MigrationSet::discover`] loads them in ascending version
//! order and [`Migrator`] applies every migration newer than the version
//! recorded by a [`MigrationStore`].
//!
//! Files are read with sqlx's directory source, but they are not applied
//! with `sqlx::migrate::Migrator`: that runner also applies a missing version
//! below the recorded maximum and has no per-migration time limit.
//!
//! ## Guarantees
//!
//! - Versions are applied strictly in ascending order, at most once each.
//! - A migration and its bookkeeping row commit together or not at all.
//! - The first failure stops the run; later versions are never attempted.
//! - Running the migrator twice against the same store applies nothing the
//!   second time.
//!
//! ## Structure
//!
//! - [`postgres`] - [`MigrationStore`] backed by a Postgres connection.

pub mod postgres;


use core::time::Duration;
use std::path::Path;

use sqlx::migrate::{MigrationSource, MigrationType};
use tokio::time::timeout;
use tonic::async_trait;
use tower::BoxError;

use crate::server::error::MigrationError;

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
}

/// Migrations sorted by ascending, unique version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Builds a set from migrations in any order.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::DuplicateVersion`] if two migrations share a
    /// version.
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        migrations.sort_by_key(|m| m.version);
        if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(MigrationError::DuplicateVersion {
                version: pair[0].version,
            });
        }
        Ok(Self { migrations })
    }

    /// Resolves every `<version>_<name>.sql` file in `dir` through sqlx's
    /// [`MigrationSource`] for paths.
    ///
    /// Subdirectories, files without an underscore and `.down.sql` halves of
    /// reversible migrations are skipped. A non-integer version prefix fails
    /// the whole discovery, and a version below 1 or an empty name is
    /// rejected rather than silently ignored.
    pub async fn discover(dir: &Path) -> Result<Self, MigrationError> {
        let resolved = dir
            .resolve()
            .await
            .map_err(|source| MigrationError::Discover {
                path: dir.to_path_buf(),
                source,
            })?;

        let migrations = resolved
            .into_iter()
            .filter(|m| !matches!(m.migration_type, MigrationType::ReversibleDown))
            .map(|m| {
                let name = m.description.trim();
                if m.version <= 0 || name.is_empty() {
                    return Err(MigrationError::InvalidFileName {
                        path: dir.join(format!("{}_{}.sql", m.version, m.description)),
                    });
                }
                Ok(Migration {
                    version: m.version,
                    name: name.to_string(),
                    sql: m.sql.into_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(migrations)
    }

    /// Migrations strictly newer than `current`.
    pub fn pending(&self, current: Option<i64>) -> impl Iterator<Item = &Migration> {
        self.migrations
            .iter()
            .filter(move |m| current.is_none_or(|v| m.version > v))
    }

    pub fn latest_version(&self) -> Option<i64> {
        self.migrations.last().map(|m| m.version)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }
}

/// Persistence for applied migration versions.
///
/// Implementations must make [`apply`](MigrationStore::apply) atomic: the
/// migration's SQL and the record of its version are committed together, or
/// neither is.
#[async_trait]
pub trait MigrationStore: Send {
    /// Creates the bookkeeping table if needed.
    async fn prepare(&mut self) -> Result<(), BoxError>;

    /// Highest applied version, or `None` on a fresh store.
    async fn current_version(&mut self) -> Result<Option<i64>, BoxError>;

    /// Runs `migration` and records its version in one transaction.
    async fn apply(&mut self, migration: &Migration) -> Result<(), BoxError>;

    /// Serialises concurrent migrators. No-op by default.
    async fn lock(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn unlock(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: usize,
    pub version: Option<i64>,
}

/// Applies a [`MigrationSet`] to a [`MigrationStore`].
#[derive(Debug, Clone)]
pub struct Migrator {
    set: MigrationSet,
    migration_timeout: Duration,
}

impl Migrator {
    pub fn new(set: MigrationSet, migration_timeout: Duration) -> Self {
        Self {
            set,
            migration_timeout,
        }
    }

    /// Applies all pending migrations while holding the store lock.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Migrations before it stay applied and
    /// recorded; the failing one is rolled back; later ones are not run.
    #[tracing::instrument(skip_all, fields(available = self.set.len()))]
    pub async fn run<S: MigrationStore>(
        &self,
        store: &mut S,
    ) -> Result<MigrationReport, MigrationError> {
        store.lock().await.map_err(MigrationError::Store)?;
        let result = self.apply_pending(store).await;
        let unlocked = store.unlock().await.map_err(MigrationError::Store);

        let report = result?;
        unlocked?;
        Ok(report)
    }

    async fn apply_pending<S: MigrationStore>(
        &self,
        store: &mut S,
    ) -> Result<MigrationReport, MigrationError> {
        store.prepare().await.map_err(MigrationError::Store)?;
        let mut version = store
            .current_version()
            .await
            .map_err(MigrationError::Store)?;

        tracing::debug!(current = ?version, latest = ?self.set.latest_version(), "Checking migrations");

        let mut applied = 0;
        for migration in self.set.pending(version) {
            tracing::info!(
                version = migration.version,
                name = %migration.name,
                "Applying migration"
            );

            match timeout(self.migration_timeout, store.apply(migration)).await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    return Err(MigrationError::Apply {
                        version: migration.version,
                        name: migration.name.clone(),
                        source,
                    });
                }
                Err(_) => {
                    return Err(MigrationError::Timeout {
                        version: migration.version,
                        name: migration.name.clone(),
                        timeout: self.migration_timeout,
                    });
                }
            }

            applied += 1;
            version = Some(migration.version);
        }

        Ok(MigrationReport { applied, version })
    }
}
