//! End-to-end pipeline tests: scheduler and worker pool over in-memory mocks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use herald_core::testutil::{
    MockExtractor, MockItemStore, MockReporter, RecordingMetrics, make_test_item,
};
use herald_core::{
    AppError, ItemStatus, JobScheduler, LifoJobQueue, MetricsSink, RateLimiter, RateLimiterConfig,
    ScrapedArticle, SchedulerConfig, WorkerPool, WorkerPoolConfig,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    cancel: CancellationToken,
    scheduler: JoinHandle<Result<(), AppError>>,
    workers: JoinHandle<Result<(), AppError>>,
}

impl Pipeline {
    fn start(
        store: &MockItemStore,
        extractor: MockExtractor,
        metrics: &Arc<RecordingMetrics>,
        max_retries: u32,
    ) -> Self {
        let cancel = CancellationToken::new();
        let queue = Arc::new(LifoJobQueue::new(4).unwrap());
        let metrics = Arc::clone(metrics) as Arc<dyn MetricsSink>;

        let scheduler = JobScheduler::new(
            store.clone(),
            Arc::clone(&queue),
            SchedulerConfig {
                batch_size: 3,
                poll_interval: Duration::from_millis(20),
                startup_delay: Duration::from_millis(10),
                max_retries,
            },
            Arc::clone(&metrics),
        )
        .unwrap();

        let limiter = RateLimiter::new(RateLimiterConfig {
            token_limit: 50,
            tokens_per_period: 50,
            replenishment_period: Duration::from_millis(10),
            queue_limit: 50,
        })
        .unwrap();

        let pool = WorkerPool::new(
            queue,
            limiter,
            extractor,
            store.clone(),
            WorkerPoolConfig::default()
                .with_worker_count(3)
                .with_error_backoff(Duration::from_millis(10)),
            metrics,
        )
        .unwrap();

        let scheduler = {
            let cancel = cancel.child_token();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };
        let workers = {
            let cancel = cancel.child_token();
            tokio::spawn(async move { pool.run(cancel, Arc::new(MockReporter::new())).await })
        };

        Self {
            cancel,
            scheduler,
            workers,
        }
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        self.scheduler.await.unwrap().unwrap();
        self.workers.await.unwrap().unwrap();
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_item_is_scraped_exactly_once() {
    let mut items: Vec<_> = (0..8).map(|_| make_test_item()).collect();
    for item in items.iter_mut().skip(4) {
        item.url = item.url.replace("example.com", "other.example.org");
    }
    let mut orphan = make_test_item();
    orphan.status = ItemStatus::InQueue;
    orphan.retry_count = 1;
    items.push(orphan.clone());

    let store = MockItemStore::with_items(items);
    let extractor = MockExtractor::succeeding();
    let metrics = Arc::new(RecordingMetrics::default());

    let pipeline = Pipeline::start(&store, extractor.clone(), &metrics, 3);
    wait_until(|| store.count(ItemStatus::Scraped) == 9).await;
    pipeline.shutdown().await;

    let calls = extractor.calls();
    assert_eq!(calls.len(), 9);
    assert_eq!(calls.iter().collect::<HashSet<_>>().len(), 9);
    assert_eq!(metrics.jobs_completed(), 9);
    assert!(!metrics.queue_depths().is_empty());

    let recovered = store.item(orphan.id).unwrap();
    assert_eq!(recovered.status, ItemStatus::Scraped);
    assert_eq!(recovered.retry_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_failures_end_in_failed_state() {
    let item = make_test_item();
    let store = MockItemStore::with_items(vec![item.clone()]);
    let extractor = MockExtractor::with_responses(
        (0..10)
            .map(|_| Ok(ScrapedArticle::failure(&item.url, "HTTP 500")))
            .collect(),
    );
    let metrics = Arc::new(RecordingMetrics::default());

    let pipeline = Pipeline::start(&store, extractor.clone(), &metrics, 2);
    wait_until(|| store.status_of(item.id) == Some(ItemStatus::Failed)).await;
    pipeline.shutdown().await;

    let failed = store.item(item.id).unwrap();
    assert_eq!(failed.retry_count, 2);
    assert_eq!(failed.error_message.as_deref(), Some("HTTP 500"));
    assert_eq!(extractor.calls().len(), 3);
    assert_eq!(metrics.jobs_completed(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_items_are_recovered_on_restart() {
    let items: Vec<_> = (0..2).map(|_| make_test_item()).collect();
    let store = MockItemStore::with_items(items.clone());
    let metrics = Arc::new(RecordingMetrics::default());

    let hanging = MockExtractor::hanging();
    let pipeline = Pipeline::start(&store, hanging.clone(), &metrics, 3);
    wait_until(|| hanging.calls().len() == 2).await;
    pipeline.shutdown().await;

    for item in &items {
        assert_eq!(store.status_of(item.id), Some(ItemStatus::InQueue));
    }

    let pipeline = Pipeline::start(&store, MockExtractor::succeeding(), &metrics, 3);
    wait_until(|| store.count(ItemStatus::Scraped) == 2).await;
    pipeline.shutdown().await;

    for item in &items {
        assert_eq!(store.item(item.id).unwrap().retry_count, 0);
    }
}
