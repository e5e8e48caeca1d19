//! Error types for the startup sequence.
//!
//! Each component owns a small error enum; [`StartupError`] aggregates them
//! and reports which lifecycle [`Stage`] failed. Every variant is fatal: the
//! binary logs the error once and exits with a non-zero status.
//!
//! ## Stages
//! - `Config`: a required setting is absent, empty or malformed.
//! - `Database`: the pool could not be built or the liveness probe failed.
//! - `Migration`: discovery or application of a schema migration failed.
//! - `Bind`: the TCP listener could not be created.
//! - `Serve`: service registration or the accept loop failed.

use core::fmt;
use core::time::Duration;
use std::net::SocketAddr;
use std::path::PathBuf;

use tower::BoxError;

/// Lifecycle step at which startup aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Database,
    Migration,
    Bind,
    Serve,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "config",
            Self::Database => "database",
            Self::Migration => "migration",
            Self::Bind => "bind",
            Self::Serve => "serve",
        })
    }
}

/// A required setting could not be resolved.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    Missing { key: &'static str },

    #[error("invalid value {value:?} for `{key}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// The database handle could not be established.
#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    /// The connection string was rejected before any network I/O.
    #[error("invalid database connection string: {0}")]
    InvalidUrl(#[source] sqlx::Error),

    /// The liveness probe reached the driver but failed.
    #[error("database liveness probe failed: {0}")]
    Unreachable(#[source] sqlx::Error),

    /// The liveness probe did not complete in time.
    #[error("database liveness probe timed out after {0:?}")]
    ProbeTimeout(Duration),
}

/// Schema migration failed; nothing past the failing version was applied.
#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("failed to read migrations from {path}: {source}")]
    Discover {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("migration file {path} is not named `<version>_<name>.sql`")]
    InvalidFileName { path: PathBuf },

    #[error("migration version {version} is defined more than once")]
    DuplicateVersion { version: i64 },

    #[error("migration store error: {0}")]
    Store(#[source] BoxError),

    #[error("migration {version} ({name}) failed: {source}")]
    Apply {
        version: i64,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("migration {version} ({name}) timed out after {timeout:?}")]
    Timeout {
        version: i64,
        name: String,
        timeout: Duration,
    },
}

/// Fatal startup failure, tagged with the stage that produced it.
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to register services: {0}")]
    Registration(#[from] tonic_reflection::server::Error),

    #[error("failed to serve: {0}")]
    Serve(#[from] tonic::transport::Error),
}

impl StartupError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Config,
            Self::Database(_) => Stage::Database,
            Self::Migration(_) => Stage::Migration,
            Self::Bind { .. } => Stage::Bind,
            Self::Registration(_) | Self::Serve(_) => Stage::Serve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_follows_component() {
        let err = StartupError::from(ConfigError::Missing { key: "PORT" });
        assert_eq!(err.stage(), Stage::Config);
        assert_eq!(err.to_string(), "missing required environment variable `PORT`");

        let err = StartupError::from(DatabaseError::ProbeTimeout(Duration::from_secs(5)));
        assert_eq!(err.stage(), Stage::Database);

        let err = StartupError::from(MigrationError::DuplicateVersion { version: 3 });
        assert_eq!(err.stage(), Stage::Migration);

        let err = StartupError::Bind {
            addr: "0.0.0.0:50051".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.stage(), Stage::Bind);
        assert!(err.to_string().starts_with("failed to listen on 0.0.0.0:50051"));
    }

    #[test]
    fn stage_display_is_lowercase() {
        assert_eq!(Stage::Migration.to_string(), "migration");
        assert_eq!(Stage::Serve.to_string(), "serve");
    }
}
