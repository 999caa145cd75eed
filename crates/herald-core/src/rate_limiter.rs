//! Per-origin token-bucket rate limiting for outbound scrape requests.
//!
//! Each origin key gets its own bucket, created lazily on first use and kept
//! for the lifetime of the [`RateLimiter`]. Buckets start full and are
//! refilled by a background task on a fixed period, independent of
//! consumption. Callers that find a bucket empty wait in FIFO order; the
//! number of waiters per bucket is bounded by `queue_limit`.
//!
//! ```text
//! acquire(key) ─► token available? ── yes ──► Ok
//!                        │ no
//!                        ▼
//!              waiters < queue_limit? ── no ──► RateLimitRejected
//!                        │ yes
//!                        ▼
//!              wait for refill tick (or cancellation)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::AppError;

/// Token-bucket parameters shared by every per-origin bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Bucket capacity; buckets start full.
    pub token_limit: usize,

    /// Tokens added on each refill tick. Zero disables refilling.
    pub tokens_per_period: usize,

    pub replenishment_period: Duration,

    /// Maximum callers allowed to wait on an empty bucket. Zero rejects
    /// every acquire that cannot be served immediately.
    pub queue_limit: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            token_limit: 5,
            tokens_per_period: 1,
            replenishment_period: Duration::from_secs(2),
            queue_limit: 100,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.token_limit == 0 {
            return Err(AppError::ConfigError(
                "Rate limiter token limit must be positive".into(),
            ));
        }
        if self.token_limit > Semaphore::MAX_PERMITS {
            return Err(AppError::ConfigError(format!(
                "Rate limiter token limit {} exceeds the maximum of {}",
                self.token_limit,
                Semaphore::MAX_PERMITS
            )));
        }
        if self.replenishment_period.is_zero() {
            return Err(AppError::ConfigError(
                "Rate limiter replenishment period must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Observability snapshot for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub available_permits: usize,
    pub queued: usize,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: Semaphore,
    queued: AtomicUsize,
    token_limit: usize,
}

impl TokenBucket {
    fn new(token_limit: usize) -> Self {
        Self {
            tokens: Semaphore::new(token_limit),
            queued: AtomicUsize::new(0),
            token_limit,
        }
    }

    /// Add up to `amount` tokens without exceeding the bucket capacity.
    fn replenish(&self, amount: usize) -> usize {
        let missing = self
            .token_limit
            .saturating_sub(self.tokens.available_permits());
        let added = missing.min(amount);
        if added > 0 {
            self.tokens.add_permits(added);
        }
        added
    }

    fn enter_queue(&self, limit: usize) -> Option<WaiterSlot<'_>> {
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(WaiterSlot {
            queued: &self.queued,
        })
    }
}

/// Occupies one waiter position; released on drop, including cancellation.
struct WaiterSlot<'a> {
    queued: &'a AtomicUsize,
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Admission gate bounding request rate per origin.
///
/// Cheap to clone; clones share the same bucket map.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Arc<DashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            config,
            buckets: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait for and consume one token from `key`'s bucket.
    ///
    /// Throttling delay is the intended effect and never an error. Fails with
    /// `RateLimitRejected` only when the bucket's wait queue is full, and with
    /// `Cancelled` if `cancel` fires while waiting.
    pub async fn acquire(&self, key: &str, cancel: &CancellationToken) -> Result<(), AppError> {
        let bucket = self.bucket(key);

        if let Ok(permit) = bucket.tokens.try_acquire() {
            permit.forget();
            return Ok(());
        }

        let Some(_slot) = bucket.enter_queue(self.config.queue_limit) else {
            tracing::error!(
                %key,
                queue_limit = self.config.queue_limit,
                "Rate limit wait queue is full, rejecting request"
            );
            return Err(AppError::RateLimitRejected {
                key: key.to_string(),
                queue_limit: self.config.queue_limit,
            });
        };

        tracing::debug!(%key, "Waiting for rate limit token");
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            permit = bucket.tokens.acquire() => permit
                .map_err(|_| AppError::Generic(format!("Rate limiter bucket for '{key}' closed")))?,
        };
        permit.forget();
        Ok(())
    }

    /// Current bucket state for `key`, or `None` if no request used it yet.
    pub fn stats(&self, key: &str) -> Option<RateLimiterStats> {
        self.buckets.get(key).map(|bucket| RateLimiterStats {
            available_permits: bucket.tokens.available_permits(),
            queued: bucket.queued.load(Ordering::Acquire),
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, key: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            let bucket = Arc::new(TokenBucket::new(self.config.token_limit));
            spawn_replenisher(&bucket, &self.config);
            tracing::info!(
                %key,
                token_limit = self.config.token_limit,
                tokens_per_period = self.config.tokens_per_period,
                period_ms = self.config.replenishment_period.as_millis() as u64,
                "Created rate limiter bucket"
            );
            bucket
        });
        Arc::clone(entry.value())
    }
}

/// Refill `bucket` every period until the bucket is dropped.
fn spawn_replenisher(bucket: &Arc<TokenBucket>, config: &RateLimiterConfig) {
    if config.tokens_per_period == 0 {
        return;
    }

    let bucket = Arc::downgrade(bucket);
    let period = config.replenishment_period;
    let amount = config.tokens_per_period;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(bucket) = bucket.upgrade() else {
                break;
            };
            bucket.replenish(amount);
        }
    });
}

/// Rate-limit key for a URL: its lowercase host.
///
/// Keyed directly by host so unrelated origins never share a bucket.
pub fn origin_key(url: &str) -> Result<String, AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidUrl(format!("{url}: URL has no host")))?;
    Ok(host.to_ascii_lowercase())
}
