pub mod config;
pub mod error;
pub mod item;
pub mod job_queue;
pub mod metrics;
pub mod models;
pub mod puller;
pub mod rate_limiter;
pub mod scheduler;
pub mod source;
#[cfg(any(test, feature = "testing"))]
pub mod testutil;
pub mod traits;
pub mod worker;

pub use config::PipelineConfig;
pub use error::AppError;
pub use item::{ItemStatus, NewItem, NewsItem, ScrapeJob, StatusUpdate};
pub use job_queue::LifoJobQueue;
pub use metrics::{METER_NAME, MetricsSink, NoopMetrics, OtelMetrics, TracingMetrics};
pub use models::ScrapedArticle;
pub use puller::{FeedPuller, FeedPullerConfig};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats, origin_key};
pub use scheduler::{JobScheduler, SchedulerConfig};
pub use source::{FeedEntry, NewSource, Source};
pub use traits::{ContentExtractor, FeedReader, ItemStore, SourceStore};
pub use worker::{
    JobOutcome, TracingWorkerReporter, WorkerEvent, WorkerPool, WorkerPoolConfig, WorkerReporter,
};
