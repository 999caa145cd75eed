use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::item::NewItem;
use crate::metrics::MetricsSink;
use crate::scheduler::sleep_or_cancel;
use crate::source::Source;
use crate::traits::{FeedReader, ItemStore, SourceStore};

/// Configuration for the feed puller loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPullerConfig {
    /// Time between two passes over all sources.
    pub pull_interval: Duration,
    /// Pause between two sources within a pass.
    pub source_delay: Duration,
}

impl Default for FeedPullerConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_secs(30 * 60),
            source_delay: Duration::from_secs(2),
        }
    }
}

impl FeedPullerConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.pull_interval.is_zero() {
            return Err(AppError::ConfigError(
                "Feed pull interval must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    pub fn with_source_delay(mut self, delay: Duration) -> Self {
        self.source_delay = delay;
        self
    }
}

/// Discovers new items by reading every registered feed and saving the
/// entries that are newer than what the store already holds for it.
pub struct FeedPuller<I, S, F>
where
    I: ItemStore,
    S: SourceStore,
    F: FeedReader,
{
    items: I,
    sources: S,
    reader: F,
    config: FeedPullerConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<I, S, F> FeedPuller<I, S, F>
where
    I: ItemStore,
    S: SourceStore,
    F: FeedReader,
{
    pub fn new(
        items: I,
        sources: S,
        reader: F,
        config: FeedPullerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            items,
            sources,
            reader,
            config,
            metrics,
        })
    }

    /// Pull all sources now and then on every pull interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AppError> {
        tracing::info!(
            interval_secs = self.config.pull_interval.as_secs(),
            "Feed puller started"
        );

        loop {
            match self.pull_all(&cancel).await {
                Ok(saved) => tracing::info!(saved, "Feed pull completed"),
                Err(AppError::Cancelled) => break,
                Err(e) => tracing::error!(error = %e, "Error pulling feeds"),
            }

            if !sleep_or_cancel(self.config.pull_interval, &cancel).await {
                break;
            }
        }

        tracing::info!("Feed puller stopped");
        Ok(())
    }

    /// One pass over every registered source. A failing source is logged and
    /// skipped. Returns the number of items saved across all sources.
    pub async fn pull_all(&self, cancel: &CancellationToken) -> Result<usize, AppError> {
        let sources = self.sources.list_sources().await?;
        if sources.is_empty() {
            tracing::debug!("No sources registered");
            return Ok(0);
        }

        let mut saved = 0;
        for (n, source) in sources.iter().enumerate() {
            if n > 0 && !sleep_or_cancel(self.config.source_delay, cancel).await {
                return Err(AppError::Cancelled);
            }

            tracing::info!(source = %source.name, url = %source.url, "Processing source");
            match self.pull_source(source, cancel).await {
                Ok(count) => {
                    tracing::info!(source = %source.name, saved = count, "Processed source");
                    saved += count;
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    tracing::error!(source = %source.name, error = %e, "Failed to process source");
                }
            }
        }
        Ok(saved)
    }

    /// Read one feed and save its new entries as `Pending` items.
    pub async fn pull_source(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<usize, AppError> {
        let latest = self.items.latest_published_at(&source.name).await?;

        let entries = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            result = self.reader.read_feed(&source.url) => result?,
        };
        let found = entries.len();

        let fresh: Vec<NewItem> = entries
            .into_iter()
            .filter(|entry| !entry.url.trim().is_empty() && entry.is_newer_than(latest))
            .map(|entry| entry.into_new_item(&source.name))
            .collect();
        tracing::debug!(
            source = %source.name,
            found,
            fresh = fresh.len(),
            "Read feed entries"
        );
        if fresh.is_empty() {
            return Ok(0);
        }

        let saved = self.items.add_items(fresh).await?;
        if saved > 0 {
            self.metrics.items_saved(saved as u64);
        }
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::item::ItemStatus;
    use crate::source::{FeedEntry, NewSource};
    use crate::testutil::{MockFeedReader, MockItemStore, MockSourceStore, RecordingMetrics};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap()
    }

    fn entry(n: u32, hour: u32) -> FeedEntry {
        FeedEntry::new(format!("Story {n}"), format!("https://gazette.example/{n}"))
            .with_published_at(at(hour))
    }

    fn puller(
        items: &MockItemStore,
        sources: &MockSourceStore,
        reader: &MockFeedReader,
        metrics: &Arc<RecordingMetrics>,
    ) -> FeedPuller<MockItemStore, MockSourceStore, MockFeedReader> {
        FeedPuller::new(
            items.clone(),
            sources.clone(),
            reader.clone(),
            FeedPullerConfig::default().with_source_delay(Duration::ZERO),
            Arc::clone(metrics) as Arc<dyn MetricsSink>,
        )
        .unwrap()
    }

    #[test]
    fn zero_pull_interval_is_config_error() {
        let result = FeedPuller::new(
            MockItemStore::empty(),
            MockSourceStore::empty(),
            MockFeedReader::empty(),
            FeedPullerConfig::default().with_pull_interval(Duration::ZERO),
            Arc::new(RecordingMetrics::default()),
        );
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn new_entries_become_pending_items() {
        let items = MockItemStore::empty();
        let sources = MockSourceStore::with_sources(vec![NewSource::new(
            "gazette",
            "https://gazette.example/rss",
        )]);
        let reader = MockFeedReader::empty();
        reader.set_entries("https://gazette.example/rss", vec![entry(1, 8), entry(2, 9)]);
        let metrics = Arc::new(RecordingMetrics::default());

        let saved = puller(&items, &sources, &reader, &metrics)
            .pull_all(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(saved, 2);
        assert_eq!(items.count(ItemStatus::Pending), 2);
        assert_eq!(metrics.saved_count(), 2);
        let stored = items.item_by_url("https://gazette.example/2").unwrap();
        assert_eq!(stored.source, "gazette");
        assert_eq!(stored.title, "Story 2");
        assert_eq!(stored.published_at, Some(at(9)));
    }

    #[tokio::test]
    async fn only_entries_newer_than_stored_ones_are_saved() {
        let items = MockItemStore::empty();
        let sources = MockSourceStore::with_sources(vec![NewSource::new(
            "gazette",
            "https://gazette.example/rss",
        )]);
        let reader = MockFeedReader::empty();
        reader.set_entries("https://gazette.example/rss", vec![entry(1, 8), entry(2, 10)]);
        let metrics = Arc::new(RecordingMetrics::default());
        let puller = puller(&items, &sources, &reader, &metrics);
        let cancel = CancellationToken::new();

        assert_eq!(puller.pull_all(&cancel).await.unwrap(), 2);

        // Older story, a repeat of the newest, a new one at the same instant
        // and a newer one.
        reader.set_entries(
            "https://gazette.example/rss",
            vec![entry(0, 7), entry(2, 10), entry(3, 10), entry(4, 11)],
        );
        assert_eq!(puller.pull_all(&cancel).await.unwrap(), 2);

        assert!(items.item_by_url("https://gazette.example/0").is_none());
        assert!(items.item_by_url("https://gazette.example/3").is_some());
        assert!(items.item_by_url("https://gazette.example/4").is_some());
        assert_eq!(items.count(ItemStatus::Pending), 4);
        assert_eq!(metrics.saved_count(), 4);
    }

    #[tokio::test]
    async fn repeated_pull_saves_nothing() {
        let items = MockItemStore::empty();
        let sources = MockSourceStore::with_sources(vec![NewSource::new(
            "wire",
            "https://wire.example/feed",
        )]);
        let reader = MockFeedReader::empty();
        reader.set_entries(
            "https://wire.example/feed",
            vec![
                FeedEntry::new("Undated", "https://wire.example/a"),
                FeedEntry::new("Undated twin", "https://wire.example/a"),
                FeedEntry::new("No link", " "),
            ],
        );
        let metrics = Arc::new(RecordingMetrics::default());
        let puller = puller(&items, &sources, &reader, &metrics);
        let cancel = CancellationToken::new();

        assert_eq!(puller.pull_all(&cancel).await.unwrap(), 1);
        assert_eq!(puller.pull_all(&cancel).await.unwrap(), 0);
        assert_eq!(metrics.saved_count(), 1);
        assert_eq!(reader.calls().len(), 2);
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_pass() {
        let items = MockItemStore::empty();
        let sources = MockSourceStore::with_sources(vec![
            NewSource::new("broken", "https://broken.example/rss"),
            NewSource::new("gazette", "https://gazette.example/rss"),
        ]);
        let reader = MockFeedReader::empty();
        reader.set_error("https://broken.example/rss", "HTTP 500");
        reader.set_entries("https://gazette.example/rss", vec![entry(1, 8)]);
        let metrics = Arc::new(RecordingMetrics::default());

        let saved = puller(&items, &sources, &reader, &metrics)
            .pull_all(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(saved, 1);
        assert_eq!(reader.calls().len(), 2);
    }

    #[tokio::test]
    async fn no_sources_is_a_no_op() {
        let items = MockItemStore::empty();
        let metrics = Arc::new(RecordingMetrics::default());
        let reader = MockFeedReader::empty();

        let saved = puller(&items, &MockSourceStore::empty(), &reader, &metrics)
            .pull_all(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(saved, 0);
        assert!(reader.calls().is_empty());
        assert_eq!(metrics.saved_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_between_sources_stops_the_pass() {
        let items = MockItemStore::empty();
        let sources = MockSourceStore::with_sources(vec![
            NewSource::new("a", "https://a.example/rss"),
            NewSource::new("b", "https://b.example/rss"),
        ]);
        let reader = MockFeedReader::empty();
        let metrics = Arc::new(RecordingMetrics::default());
        let puller = FeedPuller::new(
            items,
            sources,
            reader.clone(),
            FeedPullerConfig::default().with_source_delay(Duration::from_secs(60)),
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        )
        .unwrap();
        let cancel = CancellationToken::new();

        let pull = puller.pull_all(&cancel);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(pull, stop);

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(reader.calls(), vec!["https://a.example/rss".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_pulls_on_every_interval_until_cancelled() {
        let items = MockItemStore::empty();
        let sources = MockSourceStore::with_sources(vec![NewSource::new(
            "gazette",
            "https://gazette.example/rss",
        )]);
        let reader = MockFeedReader::empty();
        let metrics = Arc::new(RecordingMetrics::default());
        let puller = FeedPuller::new(
            items,
            sources,
            reader.clone(),
            FeedPullerConfig::default().with_pull_interval(Duration::from_secs(60)),
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        )
        .unwrap();
        let cancel = CancellationToken::new();

        let run = puller.run(cancel.clone());
        let stop = async {
            tokio::time::sleep(Duration::from_secs(150)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, stop);

        result.unwrap();
        // t = 0, 60, 120
        assert_eq!(reader.calls().len(), 3);
    }
}
