use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::puller::FeedPullerConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::scheduler::SchedulerConfig;
use crate::worker::WorkerPoolConfig;

/// Settings for a complete scrape pipeline: feed puller, queue, scheduler,
/// workers and the per-origin rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub worker: WorkerPoolConfig,
    pub scheduler: SchedulerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub puller: FeedPullerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            worker: WorkerPoolConfig::default(),
            scheduler: SchedulerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            puller: FeedPullerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from `HERALD_*` environment variables, falling back to defaults.
    ///
    /// Recognized: `HERALD_QUEUE_CAPACITY`, `HERALD_WORKER_COUNT`,
    /// `HERALD_BATCH_SIZE`, `HERALD_POLL_INTERVAL_SECS`,
    /// `HERALD_STARTUP_DELAY_SECS`, `HERALD_MAX_RETRIES`,
    /// `HERALD_TOKEN_LIMIT`, `HERALD_TOKENS_PER_PERIOD`,
    /// `HERALD_REPLENISH_PERIOD_SECS`, `HERALD_RATE_QUEUE_LIMIT`,
    /// `HERALD_PULL_INTERVAL_SECS`, `HERALD_SOURCE_DELAY_SECS`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let config = Self {
            queue_capacity: parse_or(&read, "HERALD_QUEUE_CAPACITY", defaults.queue_capacity)?,
            worker: WorkerPoolConfig {
                worker_count: parse_or(&read, "HERALD_WORKER_COUNT", defaults.worker.worker_count)?,
                ..defaults.worker
            },
            scheduler: SchedulerConfig {
                batch_size: parse_or(&read, "HERALD_BATCH_SIZE", defaults.scheduler.batch_size)?,
                poll_interval: secs_or(
                    &read,
                    "HERALD_POLL_INTERVAL_SECS",
                    defaults.scheduler.poll_interval,
                )?,
                startup_delay: secs_or(
                    &read,
                    "HERALD_STARTUP_DELAY_SECS",
                    defaults.scheduler.startup_delay,
                )?,
                max_retries: parse_or(&read, "HERALD_MAX_RETRIES", defaults.scheduler.max_retries)?,
            },
            rate_limiter: RateLimiterConfig {
                token_limit: parse_or(
                    &read,
                    "HERALD_TOKEN_LIMIT",
                    defaults.rate_limiter.token_limit,
                )?,
                tokens_per_period: parse_or(
                    &read,
                    "HERALD_TOKENS_PER_PERIOD",
                    defaults.rate_limiter.tokens_per_period,
                )?,
                replenishment_period: secs_or(
                    &read,
                    "HERALD_REPLENISH_PERIOD_SECS",
                    defaults.rate_limiter.replenishment_period,
                )?,
                queue_limit: parse_or(
                    &read,
                    "HERALD_RATE_QUEUE_LIMIT",
                    defaults.rate_limiter.queue_limit,
                )?,
            },
            puller: FeedPullerConfig {
                pull_interval: secs_or(
                    &read,
                    "HERALD_PULL_INTERVAL_SECS",
                    defaults.puller.pull_interval,
                )?,
                source_delay: secs_or(
                    &read,
                    "HERALD_SOURCE_DELAY_SECS",
                    defaults.puller.source_delay,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.queue_capacity == 0 {
            return Err(AppError::ConfigError(
                "Job queue capacity must be positive".into(),
            ));
        }
        self.worker.validate()?;
        self.scheduler.validate()?;
        self.puller.validate()?;
        self.rate_limiter.validate()
    }
}

fn parse_or<T, F>(read: &F, name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match read(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::ConfigError(format!("{name}={raw:?} is invalid: {e}"))),
        None => Ok(default),
    }
}

fn secs_or<F>(read: &F, name: &str, default: Duration) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let fallback = default.as_secs();
    parse_or(read, name, fallback).map(Duration::from_secs)
}
