//! Startup state machine.
//!
//! ```text
//! Start -> ConfigResolved -> DatabaseConnected -> [MigrationsApplied]
//!       -> Listening -> Serving -> Stopped
//!                   \-> Failed(stage)   (from any step)
//! ```
//!
//! Steps run strictly in order on the calling task. Any error is terminal for
//! the process: nothing is retried and no step is skipped after a failure.
//! Restarting is left to whatever supervises the process.
//!
//! Every transition is published on a [`watch`] channel so callers (and
//! tests) can observe how far startup got and which stage failed.

use core::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use notes_core::proto::notes_service_server::NotesServiceServer;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::server::{
    config::{CliArgs, ServerConfig},
    database::Database,
    error::{DatabaseError, MigrationError, Stage, StartupError},
    migrate::{MigrationReport, MigrationSet, Migrator, postgres::PostgresMigrationStore},
    service::{handler::NotesApi, registry::ServiceTable},
    telemetry::{increment_migrations_applied, increment_startup_failures, record_stage_duration},
};

/// Observable position of the startup sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Start,
    ConfigResolved,
    DatabaseConnected,
    MigrationsApplied,
    Listening,
    Serving,
    /// The server stopped after a shutdown signal.
    Stopped,
    Failed(Stage),
}

/// Drives the service from configuration to serving.
pub struct Lifecycle {
    state: watch::Sender<State>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(State::Start);
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    fn advance(&self, next: State) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = ?previous, to = ?next, "Lifecycle transition");
    }

    /// Runs every startup step and then serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; [`StartupError::stage`] names the step
    /// and the published state becomes [`State::Failed`] with that stage.
    pub async fn run<F>(self, args: CliArgs, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let result = self.drive(args, shutdown).await;

        match &result {
            Ok(()) => self.advance(State::Stopped),
            Err(err) => {
                increment_startup_failures(err.stage());
                self.advance(State::Failed(err.stage()));
            }
        }

        result
    }

    async fn drive<F>(&self, args: CliArgs, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let started = Instant::now();
        let config = ServerConfig::try_from(args)?;
        record_stage_duration(Stage::Config, elapsed_ms(started));
        tracing::info!(env = %config.env, port = config.port, "Configuration resolved");
        tracing::debug!(?config);
        self.advance(State::ConfigResolved);

        let started = Instant::now();
        let database = connect_database(&config).await?;
        record_stage_duration(Stage::Database, elapsed_ms(started));
        self.advance(State::DatabaseConnected);

        let result = self.serve_with_database(&config, database.clone(), shutdown).await;
        database.close().await;
        result
    }

    async fn serve_with_database<F>(
        &self,
        config: &ServerConfig,
        database: Database,
        shutdown: F,
    ) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if config.run_migrations {
            let started = Instant::now();
            run_migrations(config, &database).await?;
            record_stage_duration(Stage::Migration, elapsed_ms(started));
            self.advance(State::MigrationsApplied);
        } else {
            tracing::info!("Migrations disabled, skipping");
        }

        let started = Instant::now();
        let listener = bind(config.port).await?;
        record_stage_duration(Stage::Bind, elapsed_ms(started));
        self.advance(State::Listening);

        let table = ServiceTable::build(NotesApi::new(database)).await?;
        tracing::info!(services = ?table.names(), "Registered services");

        self.advance(State::Serving);
        serve(listener, table, shutdown).await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Builds the pool from the resolved configuration and probes it once.
pub async fn connect_database(config: &ServerConfig) -> Result<Database, DatabaseError> {
    Database::connect(config.database_url.as_str(), config.into()).await
}

/// Applies pending migrations from the configured directory.
pub async fn run_migrations(
    config: &ServerConfig,
    database: &Database,
) -> Result<MigrationReport, MigrationError> {
    let set = MigrationSet::discover(&config.migrations_dir).await?;
    tracing::debug!(
        dir = %config.migrations_dir.display(),
        found = set.len(),
        "Discovered migrations"
    );

    let mut store = PostgresMigrationStore::acquire(database)
        .await
        .map_err(|err| MigrationError::Store(err.into()))?;
    let report = Migrator::new(set, config.migration_timeout)
        .run(&mut store)
        .await?;

    increment_migrations_applied(report.applied as u64);
    tracing::info!("Applied migrations: {}", report.applied);
    Ok(report)
}

/// Binds the gRPC listener on every interface.
///
/// Fails immediately if the port is taken; no other port is tried.
pub async fn bind(port: u16) -> Result<TcpListener, StartupError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

/// Serves `table` on `listener` until `shutdown` resolves.
///
/// HTTP/1 and gRPC-Web are accepted alongside HTTP/2 so browser clients can
/// call the service directly.
pub async fn serve<F>(
    listener: TcpListener,
    table: ServiceTable,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => tracing::info!("Server listening at: {addr}"),
        Err(_) => tracing::info!("Server listening"),
    }

    let (routes, health_reporter) = table.into_parts();
    let incoming = TcpListenerStream::new(listener);

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_routes(routes)
        .serve_with_incoming_shutdown(incoming, async move {
            shutdown.await;
            tracing::info!("Shutdown signal received, terminating gracefully...");
            health_reporter
                .set_not_serving::<NotesServiceServer<NotesApi>>()
                .await;
        })
        .await
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
