//! Logging sink and OpenTelemetry setup.
//!
//! Installs a tracing-subscriber with an `EnvFilter`. With an OTLP endpoint
//! configured, worker spans, job metrics, and logs are exported there as
//! well; without one, output is plain fmt for local runs.

pub mod job;
pub mod metrics;

use crate::error::{Error, Result};

/// Configuration for telemetry initialization.
pub struct TelemetryConfig {
    /// Optional OTLP endpoint (e.g. "http://localhost:4317").
    /// When `None`, telemetry uses a simple fmt layer for local dev.
    pub endpoint: Option<String>,
    /// The service name reported in telemetry signals.
    pub service_name: String,
    /// Filter used when `RUST_LOG` is not set (e.g. "info", "resq_rs=debug").
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn from_config(config: &crate::config::Config, service_name: impl Into<String>) -> Self {
        Self {
            endpoint: config.otel_endpoint.clone(),
            service_name: service_name.into(),
            log_level: config.log_level.clone(),
        }
    }
}

/// Keeps the OTLP pipelines alive; flushes and shuts them down on drop.
///
/// Hold it for the lifetime of the process. Without an endpoint it is empty.
pub struct TelemetryGuard {
    providers: Option<OtlpProviders>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(providers) = self.providers.take() else {
            return;
        };
        // Logs first so records emitted while spans close still go out.
        let _ = providers.logs.shutdown();
        let _ = providers.metrics.shutdown();
        let _ = providers.traces.shutdown();
    }
}

struct OtlpProviders {
    traces: opentelemetry_sdk::trace::SdkTracerProvider,
    metrics: opentelemetry_sdk::metrics::SdkMeterProvider,
    logs: opentelemetry_sdk::logs::SdkLoggerProvider,
}

impl OtlpProviders {
    /// Build span, metric, and log exporters against one gRPC endpoint and
    /// register the meter provider globally.
    fn connect(endpoint: &str, service_name: &str) -> Result<Self> {
        use opentelemetry_otlp::WithExportConfig as _;

        let resource = opentelemetry_sdk::Resource::builder()
            .with_service_name(service_name.to_string())
            .with_attribute(opentelemetry::KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ))
            .build();
        let exporter_error =
            |signal: &str, e: &dyn std::fmt::Display| Error::Telemetry(format!("OTLP {signal} exporter: {e}"));

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", &e))?;
        let traces = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build();

        let instruments = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", &e))?;
        let metrics = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_periodic_exporter(instruments)
            .with_resource(resource.clone())
            .build();
        opentelemetry::global::set_meter_provider(metrics.clone());

        let records = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("log", &e))?;
        let logs = opentelemetry_sdk::logs::SdkLoggerProvider::builder()
            .with_batch_exporter(records)
            .with_resource(resource)
            .build();

        Ok(Self {
            traces,
            metrics,
            logs,
        })
    }
}

/// Install the global tracing subscriber.
///
/// Always logs to stderr through an `EnvFilter` (`RUST_LOG`, else
/// `log_level`). With an endpoint, spans and log records are also bridged to
/// OTLP and job metrics are exported.
///
/// # Errors
///
/// `Error::Config` for an unparseable filter; `Error::Telemetry` if an
/// exporter cannot be built or a subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::Config(format!("invalid log level {:?}: {e}", config.log_level)))?;

    let providers = config
        .endpoint
        .as_deref()
        .map(|endpoint| OtlpProviders::connect(endpoint, &config.service_name))
        .transpose()?;

    let trace_layer = providers
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.traces.tracer("resq-rs")));
    let log_layer = providers.as_ref().map(|p| {
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&p.logs)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Telemetry(format!("cannot install tracing subscriber: {e}")))?;

    Ok(TelemetryGuard { providers })
}
