//! Bootstrap and serving for the notes gRPC service.
//!
//! ## Structure
//!
//! - [`config`] - environment-driven settings (`PORT`, `ENV`, `DATABASE_URL`, ...).
//! - [`database`] - pooled Postgres handle with a startup liveness probe.
//! - [`migrate`] - versioned SQL migrations applied before serving.
//! - [`service`] - gRPC handler set and the static dispatch table.
//! - [`lifecycle`] - the ordered startup state machine.
//! - [`error`] - per-stage error types.
//! - [`telemetry`] - logging and optional OpenTelemetry export.

pub mod config;
pub mod database;
pub mod error;
pub mod lifecycle;
pub mod migrate;
pub mod service;
pub mod telemetry;
