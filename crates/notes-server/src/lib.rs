//! # `notes-server`
//!
//! Library half of the `notes-server` binary. The binary only loads `.env`,
//! parses [`CliArgs`](server::config::CliArgs), installs telemetry and hands
//! control to [`Lifecycle::run`](server::lifecycle::Lifecycle::run).

pub mod server;
