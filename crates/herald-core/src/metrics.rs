//! Fire-and-forget metrics hooks for the scrape pipeline.
//!
//! The pipeline only calls into a [`MetricsSink`]; wiring the values to an
//! exporter is up to the hosting process. Every method has a no-op default.
//! [`OtelMetrics`] records them as OpenTelemetry instruments on the
//! `herald` meter.

use std::sync::{Arc, Weak};
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, ObservableGauge};

use crate::job_queue::LifoJobQueue;

/// Name of the meter every pipeline instrument is created on.
pub const METER_NAME: &str = "herald";

/// Receives pipeline measurements. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    /// Counter: news items persisted.
    fn items_saved(&self, count: u64) {
        let _ = count;
    }

    /// Counter: scrape jobs that finished with extracted content.
    fn job_completed(&self) {}

    /// Histogram: end-to-end time a worker spent on one job.
    fn job_duration(&self, duration: Duration) {
        let _ = duration;
    }

    /// Histogram: time spent waiting for a rate-limit token.
    fn rate_limiter_wait(&self, duration: Duration) {
        let _ = duration;
    }

    /// Histogram: time a job spent in the queue before a worker took it.
    fn queue_wait(&self, duration: Duration) {
        let _ = duration;
    }

    /// Gauge sample: current queue depth.
    fn queue_depth(&self, depth: usize) {
        let _ = depth;
    }
}

/// Discards every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Emits measurements as `tracing` events on the `herald::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn items_saved(&self, count: u64) {
        tracing::debug!(target: "herald::metrics", metric = "news_items_saved_total", count);
    }

    fn job_completed(&self) {
        tracing::debug!(target: "herald::metrics", metric = "scrape_jobs_completed_total", count = 1u64);
    }

    fn job_duration(&self, duration: Duration) {
        tracing::debug!(
            target: "herald::metrics",
            metric = "scrape_job_duration_ms",
            value = duration.as_secs_f64() * 1000.0
        );
    }

    fn rate_limiter_wait(&self, duration: Duration) {
        tracing::debug!(
            target: "herald::metrics",
            metric = "rate_limiter_wait_duration_ms",
            value = duration.as_secs_f64() * 1000.0
        );
    }

    fn queue_wait(&self, duration: Duration) {
        tracing::debug!(
            target: "herald::metrics",
            metric = "scrape_job_queue_wait_duration_ms",
            value = duration.as_secs_f64() * 1000.0
        );
    }

    fn queue_depth(&self, depth: usize) {
        tracing::debug!(target: "herald::metrics", metric = "scrape_job_queue_length", value = depth);
    }
}

/// Records measurements on OpenTelemetry instruments.
///
/// Queue depth is an observable gauge read from the queue at collection
/// time, so [`MetricsSink::queue_depth`] samples are not needed here.
pub struct OtelMetrics {
    items_saved: Counter<u64>,
    jobs_completed: Counter<u64>,
    job_duration: Histogram<f64>,
    rate_limiter_wait: Histogram<f64>,
    queue_wait: Histogram<f64>,
    _queue_length: ObservableGauge<u64>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter, queue: &Arc<LifoJobQueue>) -> Self {
        let queue: Weak<LifoJobQueue> = Arc::downgrade(queue);

        Self {
            items_saved: meter
                .u64_counter("news_items_saved_total")
                .with_unit("items")
                .with_description("Total number of news items persisted to the database")
                .build(),
            jobs_completed: meter
                .u64_counter("scrape_jobs_completed_total")
                .with_unit("jobs")
                .with_description("Total number of successfully completed scrape jobs")
                .build(),
            job_duration: meter
                .f64_histogram("scrape_job_duration_ms")
                .with_unit("ms")
                .with_description("End-to-end duration of a scrape job handled by a worker")
                .build(),
            rate_limiter_wait: meter
                .f64_histogram("rate_limiter_wait_duration_ms")
                .with_unit("ms")
                .with_description("Time spent waiting for rate limiter permits")
                .build(),
            queue_wait: meter
                .f64_histogram("scrape_job_queue_wait_duration_ms")
                .with_unit("ms")
                .with_description("Time a scrape job spent in the queue")
                .build(),
            _queue_length: meter
                .u64_observable_gauge("scrape_job_queue_length")
                .with_unit("items")
                .with_description("Current number of items in the scrape job queue")
                .with_callback(move |observer| {
                    if let Some(queue) = queue.upgrade() {
                        observer.observe(queue.len() as u64, &[]);
                    }
                })
                .build(),
        }
    }

    /// Instruments on the globally registered meter provider.
    pub fn global(queue: &Arc<LifoJobQueue>) -> Self {
        Self::new(&opentelemetry::global::meter(METER_NAME), queue)
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl MetricsSink for OtelMetrics {
    fn items_saved(&self, count: u64) {
        self.items_saved.add(count, &[]);
    }

    fn job_completed(&self) {
        self.jobs_completed.add(1, &[]);
    }

    fn job_duration(&self, duration: Duration) {
        self.job_duration.record(millis(duration), &[]);
    }

    fn rate_limiter_wait(&self, duration: Duration) {
        self.rate_limiter_wait.record(millis(duration), &[]);
    }

    fn queue_wait(&self, duration: Duration) {
        self.queue_wait.record(millis(duration), &[]);
    }
}
