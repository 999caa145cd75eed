use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::item::{ItemStatus, ScrapeJob, StatusUpdate};
use crate::job_queue::LifoJobQueue;
use crate::metrics::MetricsSink;
use crate::models::ScrapedArticle;
use crate::rate_limiter::{RateLimiter, origin_key};
use crate::scheduler::sleep_or_cancel;
use crate::traits::{ContentExtractor, ItemStore};

/// Events emitted by workers for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker: usize,
    },
    JobDequeued {
        worker: usize,
        job: &'a ScrapeJob,
    },
    RateLimitAcquired {
        worker: usize,
        item_id: Uuid,
        key: &'a str,
        waited: Duration,
    },
    JobScraped {
        worker: usize,
        item_id: Uuid,
        title: &'a str,
        content_len: usize,
        duration: Duration,
    },
    JobFailed {
        worker: usize,
        item_id: Uuid,
        error: &'a str,
        next_status: ItemStatus,
        retry_count: u32,
        max_retries: u32,
    },
    JobErrored {
        worker: usize,
        item_id: Uuid,
        error: &'a str,
        duration: Duration,
    },
    Stopped {
        worker: usize,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker } => {
                tracing::info!(worker, "Worker started");
            }
            WorkerEvent::JobDequeued { worker, job } => {
                tracing::debug!(
                    worker,
                    item_id = %job.item_id,
                    source = %job.source,
                    url = %job.url,
                    "Worker picked up job"
                );
            }
            WorkerEvent::RateLimitAcquired {
                worker,
                item_id,
                key,
                waited,
            } => {
                tracing::debug!(
                    worker,
                    %item_id,
                    %key,
                    waited_ms = waited.as_millis() as u64,
                    "Acquired rate limit"
                );
            }
            WorkerEvent::JobScraped {
                worker,
                item_id,
                title,
                content_len,
                duration,
            } => {
                tracing::info!(
                    worker,
                    %item_id,
                    %title,
                    content_len,
                    duration_ms = duration.as_millis() as u64,
                    "Scraped item"
                );
            }
            WorkerEvent::JobFailed {
                worker,
                item_id,
                error,
                next_status,
                retry_count,
                max_retries,
            } => {
                if next_status == ItemStatus::Retry {
                    tracing::info!(
                        worker,
                        %item_id,
                        %error,
                        attempt = retry_count + 1,
                        max_retries,
                        "Scrape failed, marked for retry"
                    );
                } else {
                    tracing::warn!(
                        worker,
                        %item_id,
                        %error,
                        max_retries,
                        "Scrape failed, retries exhausted"
                    );
                }
            }
            WorkerEvent::JobErrored {
                worker,
                item_id,
                error,
                duration,
            } => {
                tracing::error!(
                    worker,
                    %item_id,
                    %error,
                    duration_ms = duration.as_millis() as u64,
                    "Failed to handle job"
                );
            }
            WorkerEvent::Stopped { worker } => {
                tracing::info!(worker, "Worker stopped");
            }
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    /// Pause after a job-level error before the worker resumes its loop.
    pub error_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.worker_count == 0 {
            return Err(AppError::ConfigError(
                "Worker count must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// How a worker's handling of one job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Extraction outcome persisted (`Scraped`, `Retry` or `Failed`).
    Handled,
    /// Unexpected error; the item was marked failed on a best-effort basis.
    Errored,
    /// Cancellation observed; the item was left untouched.
    Cancelled,
}

/// Fixed-size pool of identical workers draining the job queue.
pub struct WorkerPool<S, X>
where
    S: ItemStore + 'static,
    X: ContentExtractor + 'static,
{
    shared: Arc<Shared<S, X>>,
}

struct Shared<S, X> {
    queue: Arc<LifoJobQueue>,
    limiter: RateLimiter,
    extractor: X,
    store: S,
    config: WorkerPoolConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<S, X> WorkerPool<S, X>
where
    S: ItemStore + 'static,
    X: ContentExtractor + 'static,
{
    pub fn new(
        queue: Arc<LifoJobQueue>,
        limiter: RateLimiter,
        extractor: X,
        store: S,
        config: WorkerPoolConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                queue,
                limiter,
                extractor,
                store,
                config,
                metrics,
            }),
        })
    }

    /// Start every worker and wait for all of them.
    ///
    /// Returns once all workers stopped after `cancel` fired, or with the
    /// first unrecoverable fault (closed queue, panicked worker) after the
    /// remaining workers were cancelled and joined.
    pub async fn run<R>(&self, cancel: CancellationToken, reporter: Arc<R>) -> Result<(), AppError>
    where
        R: WorkerReporter + 'static,
    {
        let count = self.shared.config.worker_count;
        tracing::info!(workers = count, "Starting scrape workers");

        let workers_cancel = cancel.child_token();
        let mut workers = JoinSet::new();
        for worker in 0..count {
            let shared = Arc::clone(&self.shared);
            let reporter = Arc::clone(&reporter);
            let cancel = workers_cancel.clone();
            workers.spawn(async move { shared.worker_loop(worker, &cancel, reporter.as_ref()).await });
        }

        let mut fault = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(AppError::Generic(format!("Worker task failed: {e}"))));
            if let Err(e) = result
                && fault.is_none()
            {
                tracing::error!(error = %e, "Worker fault, stopping pool");
                workers_cancel.cancel();
                fault = Some(e);
            }
        }

        tracing::info!("All scrape workers stopped");
        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Handle a single job as a worker would, persisting its outcome.
    pub async fn handle_job<R: WorkerReporter>(
        &self,
        worker: usize,
        job: &ScrapeJob,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> JobOutcome {
        self.shared.handle_job(worker, job, cancel, reporter).await
    }
}

impl<S, X> Shared<S, X>
where
    S: ItemStore,
    X: ContentExtractor,
{
    async fn worker_loop<R>(
        &self,
        worker: usize,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError>
    where
        R: WorkerReporter + ?Sized,
    {
        reporter.report(WorkerEvent::Started { worker });

        let result = loop {
            let job = match self.queue.dequeue(cancel).await {
                Ok(job) => job,
                Err(AppError::Cancelled) => break Ok(()),
                Err(AppError::QueueClosed) => break Err(AppError::QueueClosed),
                Err(e) => {
                    tracing::error!(worker, error = %e, "Worker failed to dequeue job");
                    if !sleep_or_cancel(self.config.error_backoff, cancel).await {
                        break Ok(());
                    }
                    continue;
                }
            };

            self.metrics.queue_wait(job.queue_wait());
            self.metrics.queue_depth(self.queue.len());
            reporter.report(WorkerEvent::JobDequeued { worker, job: &job });

            match self.handle_job(worker, &job, cancel, reporter).await {
                JobOutcome::Handled => {}
                JobOutcome::Cancelled => break Ok(()),
                JobOutcome::Errored => {
                    if !sleep_or_cancel(self.config.error_backoff, cancel).await {
                        break Ok(());
                    }
                }
            }
        };

        reporter.report(WorkerEvent::Stopped { worker });
        result
    }

    async fn handle_job<R>(
        &self,
        worker: usize,
        job: &ScrapeJob,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> JobOutcome
    where
        R: WorkerReporter + ?Sized,
    {
        let started = Instant::now();

        let outcome = match self.process_job(worker, job, started, cancel, reporter).await {
            Ok(()) => JobOutcome::Handled,
            Err(AppError::Cancelled) => {
                tracing::debug!(worker, item_id = %job.item_id, "Job interrupted by shutdown");
                return JobOutcome::Cancelled;
            }
            Err(e) => {
                let error = e.to_string();
                reporter.report(WorkerEvent::JobErrored {
                    worker,
                    item_id: job.item_id,
                    error: &error,
                    duration: started.elapsed(),
                });

                let update = StatusUpdate::failed(format!("Critical error: {error}"));
                if let Err(update_err) = self.store.update_status(job.item_id, update).await {
                    tracing::error!(
                        worker,
                        item_id = %job.item_id,
                        error = %update_err,
                        "Failed to mark item as failed after critical error"
                    );
                }
                JobOutcome::Errored
            }
        };

        self.metrics.job_duration(started.elapsed());
        outcome
    }

    async fn process_job<R>(
        &self,
        worker: usize,
        job: &ScrapeJob,
        started: Instant,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError>
    where
        R: WorkerReporter + ?Sized,
    {
        let key = origin_key(&job.url)?;

        let wait_started = Instant::now();
        self.limiter.acquire(&key, cancel).await?;
        let waited = wait_started.elapsed();
        self.metrics.rate_limiter_wait(waited);
        reporter.report(WorkerEvent::RateLimitAcquired {
            worker,
            item_id: job.item_id,
            key: &key,
            waited,
        });

        let extracted = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            result = self.extractor.extract(&job.url) => result,
        };
        let article = extracted.unwrap_or_else(|e| ScrapedArticle::failure(&job.url, e.to_string()));

        if article.success {
            let content_len = article.content.len();
            self.store
                .update_status(job.item_id, StatusUpdate::scraped(article.content))
                .await?;
            self.metrics.job_completed();
            reporter.report(WorkerEvent::JobScraped {
                worker,
                item_id: job.item_id,
                title: &article.title,
                content_len,
                duration: started.elapsed(),
            });
        } else {
            let error = article.error_message();
            let next_status = job.failure_status();
            let update = match next_status {
                ItemStatus::Retry => StatusUpdate::retry(error),
                _ => StatusUpdate::failed(error),
            };
            self.store.update_status(job.item_id, update).await?;
            reporter.report(WorkerEvent::JobFailed {
                worker,
                item_id: job.item_id,
                error,
                next_status,
                retry_count: job.retry_count,
                max_retries: job.max_retries,
            });
        }

        Ok(())
    }
}
