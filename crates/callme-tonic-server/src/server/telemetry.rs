//! # Telemetry
//!
//! Console logging is always on. OpenTelemetry export is opt-in through cargo
//! features and goes to Honeycomb, stdout, or both.
//!
//! ## Feature matrix
//!
//! - `traces`: exports `tracing` spans as OpenTelemetry traces.
//! - `metrics`: exports the allocation and delivery counters below.
//! - `honeycomb`: OTLP/gRPC exporter configured from `HONEYCOMB_API_KEY`,
//!   `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and `HONEYCOMB_COMPRESSION`.
//! - `stdout`: prints exported spans and metrics.
//!
//! Exporters require at least one of `traces` or `metrics`.
//!
//! ## Metrics
//!
//! | Name                   | Kind      | Meaning                                   |
//! | ---------------------- | --------- | ----------------------------------------- |
//! | `reservations`         | counter   | successful reserves                       |
//! | `reservations_exhausted` | counter | reserves refused for lack of numbers      |
//! | `assignments`          | counter   | successful assigns                        |
//! | `assignments_rejected` | counter   | assigns with a wrong ref id / number pair |
//! | `existence_checks`     | counter   | `Exists` calls                            |
//! | `sms_sent`             | counter   | messages delivered                        |
//! | `sms_duplicates`       | counter   | sends short-circuited by idempotency      |
//! | `sms_failed`           | counter   | sends that returned an error              |
//! | `rpc_duration`         | histogram | handler latency in ms, by `method`        |
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features traces,metrics,honeycomb -- phonebook
//! cargo run --features traces,stdout -- sms
//! ```

#[cfg(all(feature = "honeycomb", not(any(feature = "traces", feature = "metrics"))))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'traces' or 'metrics' to be enabled."
);

#[cfg(all(feature = "stdout", not(any(feature = "traces", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'traces' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "traces")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "honeycomb")]
use tonic::metadata::MetadataMap;
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "traces")))]
use tonic::transport::ClientTlsConfig;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "traces")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "traces")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "traces")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "callme";

pub struct TelemetryProviders {
    #[cfg(feature = "traces")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops every exporter. Errors go to stderr because the
    /// subscriber may already be gone.
    pub fn shutdown(&self) {
        #[cfg(feature = "traces")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "traces")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "traces")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "traces"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Human-readable console output, independent of any exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "traces")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "traces")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "honeycomb")]
fn get_metadata() -> anyhow::Result<MetadataMap> {
    use anyhow::Context;

    let mut map = MetadataMap::new();
    let api_key = std::env::var("HONEYCOMB_API_KEY").context("missing `HONEYCOMB_API_KEY`")?;
    let dataset = std::env::var("HONEYCOMB_DATASET").context("missing `HONEYCOMB_DATASET`")?;
    map.insert(
        "x-honeycomb-team",
        api_key.parse().context("invalid API key")?,
    );
    map.insert(
        "x-honeycomb-dataset",
        dataset.parse().context("invalid dataset")?,
    );
    Ok(map)
}

#[cfg(feature = "honeycomb")]
fn honeycomb_endpoint() -> anyhow::Result<(String, Compression)> {
    use anyhow::Context;
    use std::str::FromStr;

    let endpoint = std::env::var("HONEYCOMB_ENDPOINT").context("missing `HONEYCOMB_ENDPOINT`")?;
    let raw = std::env::var("HONEYCOMB_COMPRESSION")
        .context("missing `HONEYCOMB_COMPRESSION`")?
        .to_ascii_lowercase();
    Ok((endpoint, Compression::from_str(&raw)?))
}

#[cfg(any(feature = "metrics", feature = "traces"))]
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

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let metadata = get_metadata()?;
        let (endpoint, compression) = honeycomb_endpoint()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "traces")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let metadata = get_metadata()?;
        let (endpoint, compression) = honeycomb_endpoint()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static RESERVATIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RESERVATIONS_EXHAUSTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ASSIGNMENTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ASSIGNMENTS_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static EXISTENCE_CHECKS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SMS_SENT: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SMS_DUPLICATES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SMS_FAILED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let counter = |name: &'static str, description: &'static str| {
        meter
            .u64_counter(name)
            .with_description(description)
            .build()
    };

    let _ = RESERVATIONS.set(counter("reservations", "Successful reserves"));
    let _ = RESERVATIONS_EXHAUSTED.set(counter(
        "reservations_exhausted",
        "Reserves refused for lack of available numbers",
    ));
    let _ = ASSIGNMENTS.set(counter("assignments", "Successful assigns"));
    let _ = ASSIGNMENTS_REJECTED.set(counter(
        "assignments_rejected",
        "Assigns naming no live reservation",
    ));
    let _ = EXISTENCE_CHECKS.set(counter("existence_checks", "Exists calls"));
    let _ = SMS_SENT.set(counter("sms_sent", "Messages delivered"));
    let _ = SMS_DUPLICATES.set(counter(
        "sms_duplicates",
        "Sends short-circuited by an already used idempotency key",
    ));
    let _ = SMS_FAILED.set(counter("sms_failed", "Sends that returned an error"));

    let _ = RPC_DURATION_MS.set(
        meter
            .f64_histogram("rpc_duration")
            .with_unit("ms")
            .with_description("Handler latency")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn add(counter: &OnceLock<Counter<u64>>, value: u64) {
    if let Some(counter) = counter.get() {
        counter.add(value, &[]);
    }
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_reservations() {
    add(&RESERVATIONS, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_reservations() {}

#[cfg(feature = "metrics")]
pub fn increment_reservations_exhausted() {
    add(&RESERVATIONS_EXHAUSTED, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_reservations_exhausted() {}

#[cfg(feature = "metrics")]
pub fn increment_assignments() {
    add(&ASSIGNMENTS, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_assignments() {}

#[cfg(feature = "metrics")]
pub fn increment_assignments_rejected() {
    add(&ASSIGNMENTS_REJECTED, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_assignments_rejected() {}

#[cfg(feature = "metrics")]
pub fn increment_existence_checks() {
    add(&EXISTENCE_CHECKS, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_existence_checks() {}

#[cfg(feature = "metrics")]
pub fn increment_sms_sent() {
    add(&SMS_SENT, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_sms_sent() {}

#[cfg(feature = "metrics")]
pub fn increment_sms_duplicates(count: u64) {
    add(&SMS_DUPLICATES, count);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_sms_duplicates(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_sms_failed(count: u64) {
    add(&SMS_FAILED, count);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_sms_failed(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn record_rpc_duration(method: &'static str, duration_ms: f64) {
    if let Some(histogram) = RPC_DURATION_MS.get() {
        histogram.record(duration_ms, &[KeyValue::new("method", method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_rpc_duration(_method: &'static str, _duration_ms: f64) {}
