//! OpenTelemetry metrics export for `herald run`.
//!
//! With an OTLP endpoint configured the pipeline's instruments are exported
//! there over gRPC; otherwise measurements are only logged at debug level.

use std::sync::Arc;

use anyhow::{Context, Result};
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;

use herald_core::{LifoJobQueue, MetricsSink, OtelMetrics, TracingMetrics};

const SERVICE_NAME: &str = "herald";

/// Flushes and shuts down the meter provider on drop.
///
/// Must be held until the pipeline has stopped.
pub struct MetricsGuard {
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for MetricsGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to shut down meter provider");
            }
        }
    }
}

/// Pick the metrics sink for a pipeline draining `queue`.
pub fn init_metrics(
    endpoint: Option<&str>,
    queue: &Arc<LifoJobQueue>,
) -> Result<(Arc<dyn MetricsSink>, MetricsGuard)> {
    let Some(endpoint) = endpoint else {
        tracing::debug!("No OTLP endpoint configured, logging metrics only");
        return Ok((
            Arc::new(TracingMetrics),
            MetricsGuard {
                meter_provider: None,
            },
        ));
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let resource = Resource::builder().with_service_name(SERVICE_NAME).build();
    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build();
    opentelemetry::global::set_meter_provider(provider.clone());

    tracing::info!(%endpoint, "Exporting metrics over OTLP");
    Ok((
        Arc::new(OtelMetrics::global(queue)),
        MetricsGuard {
            meter_provider: Some(provider),
        },
    ))
}
