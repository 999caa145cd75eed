//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls. Compiled for this crate's tests and
//! behind the `testing` feature for everyone else.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::item::{ItemStatus, NewItem, NewsItem, ScrapeJob, StatusUpdate};
use crate::metrics::MetricsSink;
use crate::models::ScrapedArticle;
use crate::source::{FeedEntry, NewSource, Source};
use crate::traits::{ContentExtractor, FeedReader, ItemStore, SourceStore};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockItemStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    items: Vec<NewsItem>,
    updates: Vec<(Uuid, StatusUpdate)>,
    reserve_error: Option<AppError>,
    failing_updates: usize,
}

/// In-memory item store. Clones share the same state.
///
/// Reservation runs entirely under one lock, so concurrent callers never
/// receive the same item.
#[derive(Clone, Default)]
pub struct MockItemStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockItemStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<NewsItem>) -> Self {
        let store = Self::empty();
        store.state.lock().unwrap().items = items;
        store
    }

    pub fn insert(&self, item: NewsItem) {
        self.state.lock().unwrap().items.push(item);
    }

    /// The next `reserve_eligible` call fails with `error`.
    pub fn fail_next_reserve(&self, error: AppError) {
        self.state.lock().unwrap().reserve_error = Some(error);
    }

    /// The next `n` `update_status` calls fail with a database error.
    pub fn fail_next_updates(&self, n: usize) {
        self.state.lock().unwrap().failing_updates = n;
    }

    pub fn item(&self, id: Uuid) -> Option<NewsItem> {
        let state = self.state.lock().unwrap();
        state.items.iter().find(|i| i.id == id).cloned()
    }

    pub fn item_by_url(&self, url: &str) -> Option<NewsItem> {
        let state = self.state.lock().unwrap();
        state.items.iter().find(|i| i.url == url).cloned()
    }

    pub fn status_of(&self, id: Uuid) -> Option<ItemStatus> {
        self.item(id).map(|i| i.status)
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        let state = self.state.lock().unwrap();
        state.items.iter().filter(|i| i.status == status).count()
    }

    /// Successful status updates, in call order.
    pub fn updates(&self) -> Vec<(Uuid, StatusUpdate)> {
        self.state.lock().unwrap().updates.clone()
    }

    /// Synchronous reservation, bypassing any injected failure.
    pub fn reserve_now(&self, batch_size: usize) -> Vec<NewsItem> {
        let mut state = self.state.lock().unwrap();
        let mut eligible: Vec<&mut NewsItem> = state
            .items
            .iter_mut()
            .filter(|i| i.status.is_eligible())
            .collect();
        eligible.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let now = Utc::now();
        eligible
            .into_iter()
            .take(batch_size)
            .map(|item| {
                item.status = ItemStatus::InQueue;
                item.updated_at = now;
                item.clone()
            })
            .collect()
    }

    /// Poll until `id` reaches `status` or `timeout` elapses.
    pub async fn wait_for_status(&self, id: Uuid, status: ItemStatus, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.status_of(id) == Some(status) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl ItemStore for MockItemStore {
    async fn reserve_eligible(&self, batch_size: usize) -> Result<Vec<NewsItem>, AppError> {
        let injected = self.state.lock().unwrap().reserve_error.take();
        if let Some(e) = injected {
            return Err(e);
        }
        Ok(self.reserve_now(batch_size))
    }

    async fn list_by_status(
        &self,
        status: ItemStatus,
        limit: usize,
    ) -> Result<Vec<NewsItem>, AppError> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<NewsItem> = state
            .items
            .iter()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(AppError::DatabaseError("update failed".into()));
        }

        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| AppError::NotFound(format!("News item {id}")))?;
        item.status.ensure_transition(id, update.status)?;

        item.status = update.status;
        if update.status == ItemStatus::Retry {
            item.retry_count += 1;
        }
        if let Some(content) = &update.content {
            item.scraped_content = Some(content.clone());
        }
        if update.status == ItemStatus::Scraped {
            item.error_message = None;
        }
        if let Some(error) = &update.error {
            item.error_message = Some(error.clone());
        }
        item.updated_at = Utc::now();

        state.updates.push((id, update));
        Ok(())
    }

    async fn create_item(&self, item: NewItem) -> Result<NewsItem, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.items.iter().any(|i| i.url == item.url) {
            return Err(AppError::AlreadyExists(format!(
                "News item with URL {}",
                item.url
            )));
        }
        let created = pending_item(item);
        state.items.push(created.clone());
        Ok(created)
    }

    async fn add_items(&self, items: Vec<NewItem>) -> Result<usize, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut seen: HashSet<String> = state.items.iter().map(|i| i.url.clone()).collect();
        let mut added = 0;
        for item in items {
            if seen.insert(item.url.clone()) {
                state.items.push(pending_item(item));
                added += 1;
            }
        }
        Ok(added)
    }

    async fn latest_published_at(&self, source: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .filter(|i| i.source == source)
            .filter_map(|i| i.published_at)
            .max())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<NewsItem>, AppError> {
        Ok(self.item(id))
    }

    async fn count_by_status(&self, status: ItemStatus) -> Result<i64, AppError> {
        Ok(self.count(status) as i64)
    }
}

fn pending_item(item: NewItem) -> NewsItem {
    let now = Utc::now();
    NewsItem {
        id: Uuid::new_v4(),
        source: item.source,
        url: item.url,
        title: item.title,
        published_at: item.published_at,
        status: ItemStatus::Pending,
        retry_count: 0,
        scraped_content: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// MockSourceStore
// ---------------------------------------------------------------------------

/// In-memory source registry. Clones share the same state.
#[derive(Clone, Default)]
pub struct MockSourceStore {
    sources: Arc<Mutex<Vec<Source>>>,
}

impl MockSourceStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: Vec<NewSource>) -> Self {
        let store = Self::empty();
        store.add_now(sources);
        store
    }

    fn add_now(&self, sources: Vec<NewSource>) -> usize {
        let mut stored = self.sources.lock().unwrap();
        let mut added = 0;
        for source in sources {
            let taken = stored
                .iter()
                .any(|s| s.name == source.name || s.url == source.url);
            if taken {
                continue;
            }
            let now = Utc::now();
            stored.push(Source {
                id: Uuid::new_v4(),
                name: source.name,
                url: source.url,
                created_at: now,
                updated_at: now,
            });
            added += 1;
        }
        added
    }
}

impl SourceStore for MockSourceStore {
    async fn list_sources(&self) -> Result<Vec<Source>, AppError> {
        let mut sources = self.sources.lock().unwrap().clone();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    async fn add_sources(&self, sources: Vec<NewSource>) -> Result<usize, AppError> {
        Ok(self.add_now(sources))
    }
}

// ---------------------------------------------------------------------------
// MockFeedReader
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FeedState {
    feeds: HashMap<String, Result<Vec<FeedEntry>, String>>,
    calls: Vec<String>,
}

/// Feed reader serving canned entries per feed URL. Unknown feeds are empty.
#[derive(Clone, Default)]
pub struct MockFeedReader {
    state: Arc<Mutex<FeedState>>,
}

impl MockFeedReader {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set_entries(&self, feed_url: &str, entries: Vec<FeedEntry>) {
        let mut state = self.state.lock().unwrap();
        state.feeds.insert(feed_url.to_string(), Ok(entries));
    }

    /// Reading `feed_url` fails with a feed error carrying `message`.
    pub fn set_error(&self, feed_url: &str, message: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .feeds
            .insert(feed_url.to_string(), Err(message.to_string()));
    }

    /// Feed URLs read so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl FeedReader for MockFeedReader {
    async fn read_feed(&self, feed_url: &str) -> Result<Vec<FeedEntry>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(feed_url.to_string());
        match state.feeds.get(feed_url) {
            Some(Ok(entries)) => Ok(entries.clone()),
            Some(Err(message)) => Err(AppError::FeedError(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that returns configurable articles.
#[derive(Clone, Default)]
pub struct MockExtractor {
    /// Queue of responses. Each call pops the front element.
    /// If empty, returns a successful default article.
    responses: Arc<Mutex<VecDeque<Result<ScrapedArticle, AppError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    hang: bool,
}

impl MockExtractor {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn new(article: ScrapedArticle) -> Self {
        Self::with_responses(vec![Ok(article)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<ScrapedArticle, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    /// Extractor whose calls never complete.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// URLs passed to `extract`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ContentExtractor for MockExtractor {
    async fn extract(&self, url: &str) -> Result<ScrapedArticle, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.hang {
            std::future::pending::<()>().await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ScrapedArticle::success(
                url,
                "Test Article",
                "Test article content",
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingMetrics
// ---------------------------------------------------------------------------

/// Metrics sink that counts every measurement.
#[derive(Default)]
pub struct RecordingMetrics {
    saved: AtomicU64,
    completed: AtomicU64,
    durations: AtomicU64,
    limiter_waits: AtomicU64,
    queue_waits: AtomicU64,
    depths: Mutex<Vec<usize>>,
}

impl RecordingMetrics {
    pub fn saved_count(&self) -> u64 {
        self.saved.load(Ordering::SeqCst)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn job_durations(&self) -> u64 {
        self.durations.load(Ordering::SeqCst)
    }

    pub fn rate_limiter_waits(&self) -> u64 {
        self.limiter_waits.load(Ordering::SeqCst)
    }

    pub fn queue_waits(&self) -> u64 {
        self.queue_waits.load(Ordering::SeqCst)
    }

    pub fn queue_depths(&self) -> Vec<usize> {
        self.depths.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn items_saved(&self, count: u64) {
        self.saved.fetch_add(count, Ordering::SeqCst);
    }

    fn job_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn job_duration(&self, _duration: Duration) {
        self.durations.fetch_add(1, Ordering::SeqCst);
    }

    fn rate_limiter_wait(&self, _duration: Duration) {
        self.limiter_waits.fetch_add(1, Ordering::SeqCst);
    }

    fn queue_wait(&self, _duration: Duration) {
        self.queue_waits.fetch_add(1, Ordering::SeqCst);
    }

    fn queue_depth(&self, depth: usize) {
        self.depths.lock().unwrap().push(depth);
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records the variant name of every event.
#[derive(Default)]
pub struct MockReporter {
    events: Mutex<Vec<String>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::JobDequeued { .. } => "JobDequeued",
            WorkerEvent::RateLimitAcquired { .. } => "RateLimitAcquired",
            WorkerEvent::JobScraped { .. } => "JobScraped",
            WorkerEvent::JobFailed { .. } => "JobFailed",
            WorkerEvent::JobErrored { .. } => "JobErrored",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A fresh `Pending` item with a unique URL on `example.com`.
pub fn make_test_item() -> NewsItem {
    let id = Uuid::new_v4();
    let now = Utc::now();
    NewsItem {
        id,
        source: "test-feed".to_string(),
        url: format!("https://example.com/news/{}", id.simple()),
        title: "Test headline".to_string(),
        published_at: None,
        status: ItemStatus::Pending,
        retry_count: 0,
        scraped_content: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn make_test_job() -> ScrapeJob {
    ScrapeJob::from_item(&make_test_item(), 3)
}
