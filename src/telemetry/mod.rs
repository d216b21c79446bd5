//! Telemetry for the `hermes` binary.
//!
//! Log lines always go to stderr so the tables printed on stdout stay clean.
//! With an OTLP endpoint configured, spans, metrics and log records are also
//! exported over gRPC under one shared resource.

pub mod matching;
pub mod metrics;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::Config;
use crate::error::{Error, Result};

/// Service name, tracer name and meter name.
pub const SERVICE_NAME: &str = "hermes";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`. `None` logs locally only.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn new(endpoint: Option<String>, log_level: impl Into<String>) -> Self {
        Self {
            endpoint,
            service_name: SERVICE_NAME.to_string(),
            log_level: log_level.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.otel_endpoint.clone(), config.log_level.clone())
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
            .build()
    }

    /// `RUST_LOG` wins, then `log_level`, then `info`.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// The three OTLP providers. Flushed and shut down together.
struct Exporters {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl Exporters {
    fn connect(endpoint: &str, resource: Resource) -> Result<Self> {
        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("span"))?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("metric"))?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("log"))?;

        Ok(Self {
            tracer: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            meter: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logger: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        })
    }

    fn flush(&self) {
        let _ = self.tracer.force_flush();
        let _ = self.meter.force_flush();
        let _ = self.logger.force_flush();
    }
}

impl Drop for Exporters {
    fn drop(&mut self) {
        // Reverse of creation order.
        let _ = self.logger.shutdown();
        let _ = self.meter.shutdown();
        let _ = self.tracer.shutdown();
    }
}

fn exporter_error<E: std::fmt::Display>(signal: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Other(format!("failed to create OTLP {signal} exporter: {e}"))
}

/// Keeps the OTLP pipelines alive. Dropping it flushes and shuts them down.
pub struct TelemetryGuard {
    exporters: Option<Exporters>,
}

impl TelemetryGuard {
    /// Whether an OTLP endpoint is receiving telemetry.
    pub fn is_exporting(&self) -> bool {
        self.exporters.is_some()
    }

    pub fn force_flush(&self) {
        if let Some(ref exporters) = self.exporters {
            exporters.flush();
        }
    }
}

/// Install the global subscriber, plus the OTLP pipelines when an endpoint
/// is configured.
///
/// # Errors
///
/// Fails if an exporter cannot be built or a global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let exporters = config
        .endpoint
        .as_deref()
        .map(|endpoint| Exporters::connect(endpoint, config.resource()))
        .transpose()?;

    let trace_layer = exporters.as_ref().map(|e| {
        tracing_opentelemetry::layer().with_tracer(e.tracer.tracer(config.service_name.clone()))
    });
    let log_layer = exporters
        .as_ref()
        .map(|e| OpenTelemetryTracingBridge::new(&e.logger));

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    if let Some(ref exporters) = exporters {
        opentelemetry::global::set_meter_provider(exporters.meter.clone());
    }
    Ok(TelemetryGuard { exporters })
}
