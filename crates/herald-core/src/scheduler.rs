use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::item::{ItemStatus, ScrapeJob};
use crate::job_queue::LifoJobQueue;
use crate::metrics::MetricsSink;
use crate::traits::ItemStore;

/// Configuration for the job scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum items reserved per scheduling cycle.
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// Pause between startup recovery and the first scheduling cycle.
    pub startup_delay: Duration,
    /// Retry ceiling stamped on every job.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(30),
            startup_delay: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::ConfigError(
                "Scheduler batch size must be positive".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(AppError::ConfigError(
                "Scheduler poll interval must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }
}

/// Bridges persisted, eligible items into the in-memory job queue.
pub struct JobScheduler<S: ItemStore> {
    store: S,
    queue: Arc<LifoJobQueue>,
    config: SchedulerConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<S: ItemStore> JobScheduler<S> {
    pub fn new(
        store: S,
        queue: Arc<LifoJobQueue>,
        config: SchedulerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            store,
            queue,
            config,
            metrics,
        })
    }

    /// Recover orphaned items, then schedule on every poll interval until
    /// cancelled.
    ///
    /// Cycle errors are logged and the loop keeps going. The only error
    /// returned is `QueueClosed`, since nothing can be scheduled afterwards.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AppError> {
        tracing::info!(
            interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Job scheduler started"
        );

        match self.recover_in_queue(&cancel).await {
            Ok(_) => {}
            Err(AppError::Cancelled) => return Ok(()),
            Err(AppError::QueueClosed) => return Err(AppError::QueueClosed),
            Err(e) => tracing::error!(error = %e, "Error recovering in-queue items"),
        }

        if !sleep_or_cancel(self.config.startup_delay, &cancel).await {
            tracing::info!("Job scheduler stopped");
            return Ok(());
        }

        loop {
            match self.schedule_cycle(&cancel).await {
                Ok(_) => {}
                Err(AppError::Cancelled) => break,
                Err(AppError::QueueClosed) => {
                    tracing::error!("Job queue closed, stopping scheduler");
                    return Err(AppError::QueueClosed);
                }
                Err(e) => tracing::error!(error = %e, "Error in job scheduling cycle"),
            }

            if !sleep_or_cancel(self.config.poll_interval, &cancel).await {
                break;
            }
        }

        tracing::info!("Job scheduler stopped");
        Ok(())
    }

    /// Re-enqueue items left `InQueue` by a previous run.
    ///
    /// Their retry counts are left untouched: the reservation never completed.
    pub async fn recover_in_queue(&self, cancel: &CancellationToken) -> Result<usize, AppError> {
        tracing::info!("Recovering in-queue items from previous session");

        let items = self
            .store
            .list_by_status(ItemStatus::InQueue, usize::MAX)
            .await?;
        if items.is_empty() {
            tracing::info!("No in-queue items found to recover");
            return Ok(0);
        }

        tracing::info!(count = items.len(), "Found in-queue items to recover");
        let mut recovered = 0;
        for item in &items {
            let job = ScrapeJob::from_item(item, self.config.max_retries);
            self.queue.enqueue(job, cancel).await?;
            recovered += 1;
            tracing::debug!(item_id = %item.id, title = %item.title, "Recovered in-queue item");
        }

        self.metrics.queue_depth(self.queue.len());
        tracing::info!(count = recovered, "Recovered in-queue items into the queue");
        Ok(recovered)
    }

    /// Reserve a batch of eligible items and enqueue one job per item.
    ///
    /// Returns the number of jobs enqueued; zero eligible items is a no-op.
    pub async fn schedule_cycle(&self, cancel: &CancellationToken) -> Result<usize, AppError> {
        let started = Instant::now();
        tracing::debug!("Starting job scheduling cycle");

        let items = self.store.reserve_eligible(self.config.batch_size).await?;
        if items.is_empty() {
            tracing::debug!("No items ready for scraping");
            return Ok(0);
        }

        tracing::info!(count = items.len(), "Found items ready for scraping");
        let mut enqueued = 0;
        for item in &items {
            let job = ScrapeJob::from_item(item, self.config.max_retries);
            self.queue.enqueue(job, cancel).await?;
            enqueued += 1;
            tracing::debug!(
                item_id = %item.id,
                title = %item.title,
                retry_count = item.retry_count,
                "Enqueued scrape job"
            );
        }

        let depth = self.queue.len();
        self.metrics.queue_depth(depth);
        tracing::info!(
            duration_ms = started.elapsed().as_millis() as u64,
            jobs = enqueued,
            queue_depth = depth,
            "Job scheduling cycle completed"
        );
        Ok(enqueued)
    }
}

/// Sleep for `duration`; returns false if cancelled first.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
