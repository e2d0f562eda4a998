//! Logging and self-instrumentation for the engine itself.
//!
//! A fmt layer on stderr is always installed, filtered by `RUST_LOG` or the
//! configured level. With an OTLP endpoint the `kpi.push` spans and the
//! `kpi.*` instruments from [`metrics`] are exported there too.
//!
//! This observes kpi-metrics, not the KPIs it manages; those go through
//! [`crate::backend`].

pub mod metrics;
pub mod spans;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::error::{Error, Result};

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

/// Span and instrument exporters for one OTLP endpoint.
struct OtlpExport {
    spans: SdkTracerProvider,
    instruments: SdkMeterProvider,
}

impl OtlpExport {
    fn connect(endpoint: &str, service_name: &str) -> Result<Self> {
        let resource = Resource::builder()
            .with_service_name(service_name.to_string())
            .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
            .build();

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", endpoint, e))?;
        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", endpoint, e))?;

        Ok(Self {
            spans: SdkTracerProvider::builder()
                .with_batch_exporter(span_exporter)
                .with_resource(resource.clone())
                .build(),
            instruments: SdkMeterProvider::builder()
                .with_periodic_exporter(metric_exporter)
                .with_resource(resource)
                .build(),
        })
    }
}

fn exporter_error(signal: &str, endpoint: &str, e: impl std::fmt::Display) -> Error {
    Error::Config(format!("cannot build OTLP {signal} exporter for {endpoint}: {e}"))
}

/// Keeps OTLP export running. Dropping it flushes and shuts it down, so
/// hold it for the life of the process.
pub struct TelemetryGuard {
    otlp: Option<OtlpExport>,
}

impl TelemetryGuard {
    pub fn is_exporting(&self) -> bool {
        self.otlp.is_some()
    }

    /// Send buffered spans and instrument readings now.
    pub fn force_flush(&self) {
        let Some(otlp) = &self.otlp else {
            return;
        };
        if let Err(e) = otlp.spans.force_flush() {
            tracing::warn!(error = %e, "span flush failed");
        }
        if let Err(e) = otlp.instruments.force_flush() {
            tracing::warn!(error = %e, "instrument flush failed");
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(otlp) = self.otlp.take() {
            let _ = otlp.instruments.shutdown();
            let _ = otlp.spans.shutdown();
        }
    }
}

/// Install the global tracing subscriber, plus OTLP export when
/// `config.endpoint` is set.
///
/// # Errors
///
/// `Error::Config` if an exporter cannot be built, `Error::Other` if a
/// global subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let otlp = config
        .endpoint
        .as_deref()
        .map(|endpoint| OtlpExport::connect(endpoint, &config.service_name))
        .transpose()?;
    let span_layer = otlp.as_ref().map(|otlp| {
        tracing_opentelemetry::layer().with_tracer(otlp.spans.tracer("kpi-metrics"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(span_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to install tracing subscriber: {e}")))?;

    if let Some(otlp) = &otlp {
        opentelemetry::global::set_meter_provider(otlp.instruments.clone());
        tracing::info!(
            endpoint = config.endpoint.as_deref().unwrap_or_default(),
            "exporting self-telemetry over OTLP"
        );
    }
    Ok(TelemetryGuard { otlp })
}
