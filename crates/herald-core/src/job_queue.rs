//! Bounded, last-in-first-out handoff buffer between the scheduler and workers.
//!
//! Two counting semaphores gate access: `slots_free` (starts at capacity) for
//! producers and `items_available` (starts at zero) for consumers. A permit
//! is only consumed (`forget`) once its acquisition has completed, so a
//! cancelled or dropped wait never leaks capacity.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::item::ScrapeJob;

/// Fixed-capacity LIFO job queue with backpressure.
///
/// The freshest job is handed out first, trading strict fairness for latency
/// on newly discovered items.
#[derive(Debug)]
pub struct LifoJobQueue {
    stack: Mutex<Vec<ScrapeJob>>,
    slots_free: Semaphore,
    items_available: Semaphore,
    capacity: usize,
}

impl LifoJobQueue {
    pub fn new(capacity: usize) -> Result<Self, AppError> {
        if capacity == 0 {
            return Err(AppError::ConfigError(
                "Job queue capacity must be positive".into(),
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(AppError::ConfigError(format!(
                "Job queue capacity {capacity} exceeds the maximum of {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            stack: Mutex::new(Vec::with_capacity(capacity)),
            slots_free: Semaphore::new(capacity),
            items_available: Semaphore::new(0),
            capacity,
        })
    }

    /// Push a job, suspending while the queue is full.
    pub async fn enqueue(&self, job: ScrapeJob, cancel: &CancellationToken) -> Result<(), AppError> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            permit = self.slots_free.acquire() => permit.map_err(|_| AppError::QueueClosed)?,
        };
        permit.forget();

        self.lock_stack().push(job);
        self.items_available.add_permits(1);
        Ok(())
    }

    /// Pop the most recently enqueued job, suspending while the queue is empty.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<ScrapeJob, AppError> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            permit = self.items_available.acquire() => permit.map_err(|_| AppError::QueueClosed)?,
        };
        permit.forget();

        let job = self.lock_stack().pop();
        match job {
            Some(job) => {
                self.slots_free.add_permits(1);
                Ok(job)
            }
            None => {
                self.items_available.add_permits(1);
                Err(AppError::Generic(
                    "Job queue state is inconsistent: no job after item permit".into(),
                ))
            }
        }
    }

    /// Current depth. Never blocks on queue admission.
    pub fn len(&self) -> usize {
        self.lock_stack().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dispose the queue. Blocked and future calls fail with `QueueClosed`.
    pub fn close(&self) {
        self.slots_free.close();
        self.items_available.close();
        tracing::debug!(dropped = self.len(), "Job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.items_available.is_closed()
    }

    fn lock_stack(&self) -> MutexGuard<'_, Vec<ScrapeJob>> {
        self.stack.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job queue mutex");
            poisoned.into_inner()
        })
    }
}
