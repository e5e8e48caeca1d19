//! # Telemetry
//!
//! Console logging through `tracing_subscriber::fmt` is always on and filtered
//! by `RUST_LOG` (default `info`). OpenTelemetry export is opt-in:
//!
//! - `tracing`: export spans through OpenTelemetry.
//! - `metrics`: export startup metrics (stage durations, migrations applied,
//!   failures by stage).
//! - `otlp`: send both over OTLP/gRPC. The collector is configured with the
//!   standard `OTEL_EXPORTER_OTLP_*` variables (endpoint, headers,
//!   compression).
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=https://collector:4317 \
//!     cargo run -p notes-server --features tracing,metrics,otlp
//! ```
//!
//! Events outside a span only reach the console.

#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(feature = "otlp")]
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};

use crate::server::error::Stage;

#[cfg(any(feature = "metrics", feature = "tracing"))]
const SERVICE_NAME: &str = "notes-server";

#[cfg(feature = "otlp")]
const EXPORT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Exporter handles that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops every exporter. Errors go to stderr since the
    /// subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        if let Err(err) = self.tracer_provider.shutdown() {
            eprintln!("Error shutting down tracer: {err:#?}");
        }

        #[cfg(feature = "metrics")]
        if let Err(err) = self.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {err:#?}");
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if an exporter cannot be built or a global subscriber is already
/// installed.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        );

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;
    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;
    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otlp")]
fn otlp_tls() -> tonic::transport::ClientTlsConfig {
    tonic::transport::ClientTlsConfig::new().with_native_roots()
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(otlp_tls())
            .with_timeout(EXPORT_TIMEOUT)
            .build()
            .context("failed to build span exporter")?;
        builder.with_batch_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(otlp_tls())
            .with_timeout(EXPORT_TIMEOUT)
            .build()
            .context("failed to build metric exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static STAGE_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MIGRATIONS_APPLIED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STARTUP_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = STAGE_DURATION_MS.set(
        meter
            .f64_histogram("startup_stage_duration")
            .with_unit("ms")
            .with_description("Time spent in each startup stage")
            .build(),
    );

    let _ = MIGRATIONS_APPLIED.set(
        meter
            .u64_counter("migrations_applied")
            .with_description("Schema migrations applied at startup")
            .build(),
    );

    let _ = STARTUP_FAILURES.set(
        meter
            .u64_counter("startup_failures")
            .with_description("Fatal startup failures by stage")
            .build(),
    );
}

// No-ops unless the `metrics` feature is enabled.
#[cfg(feature = "metrics")]
pub fn record_stage_duration(stage: Stage, duration_ms: f64) {
    if let Some(histogram) = STAGE_DURATION_MS.get() {
        histogram.record(duration_ms, &[KeyValue::new("stage", stage.to_string())]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_stage_duration(_stage: Stage, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_migrations_applied(count: u64) {
    if let Some(counter) = MIGRATIONS_APPLIED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_migrations_applied(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_startup_failures(stage: Stage) {
    if let Some(counter) = STARTUP_FAILURES.get() {
        counter.add(1, &[KeyValue::new("stage", stage.to_string())]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_startup_failures(_stage: Stage) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_helpers_are_safe_before_init() {
        record_stage_duration(Stage::Database, 12.5);
        increment_migrations_applied(3);
        increment_startup_failures(Stage::Bind);
    }

    #[test]
    fn second_install_is_rejected() {
        let providers = init_telemetry().unwrap();
        assert!(init_telemetry().is_err());
        providers.shutdown();
    }
}
