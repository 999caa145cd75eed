use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle status of a news item in the scrape pipeline.
///
/// ```text
/// Pending ──► InQueue ──► Scraped
///    ▲           │  └───► Failed
///    │           ▼
///    └─ (next cycle) ── Retry
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InQueue,
    Scraped,
    Retry,
    Failed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 5] = [
        ItemStatus::Pending,
        ItemStatus::InQueue,
        ItemStatus::Scraped,
        ItemStatus::Retry,
        ItemStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InQueue => "in_queue",
            ItemStatus::Scraped => "scraped",
            ItemStatus::Retry => "retry",
            ItemStatus::Failed => "failed",
        }
    }

    /// Whether a scheduling cycle may reserve an item in this status.
    pub fn is_eligible(&self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Retry)
    }

    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        match self {
            ItemStatus::Pending | ItemStatus::Retry => next == ItemStatus::InQueue,
            ItemStatus::InQueue => matches!(
                next,
                ItemStatus::Scraped | ItemStatus::Retry | ItemStatus::Failed
            ),
            ItemStatus::Scraped | ItemStatus::Failed => false,
        }
    }

    /// Statuses an item may be in for a move to `next` to be legal.
    pub fn sources_of(next: ItemStatus) -> Vec<ItemStatus> {
        ItemStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }

    /// `InvalidTransition` unless `self -> next` is an edge of the state machine.
    pub fn ensure_transition(self, id: Uuid, next: ItemStatus) -> Result<(), AppError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                id,
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ItemStatus::Pending),
            "in_queue" | "inqueue" => Ok(ItemStatus::InQueue),
            "scraped" => Ok(ItemStatus::Scraped),
            "retry" => Ok(ItemStatus::Retry),
            "failed" => Ok(ItemStatus::Failed),
            _ => Err(format!("Unknown item status: {}", s)),
        }
    }
}

/// A discovered news item, as persisted by the item store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: Uuid,
    pub source: String,
    pub url: String,
    pub title: String,
    /// Publication time reported by the feed, if any.
    pub published_at: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub scraped_content: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to insert a new item. New items start as `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub source: String,
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewItem {
    pub fn new(
        source: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            title: title.into(),
            published_at: None,
        }
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}

/// Outcome to persist for an item after a worker handled its job.
///
/// Store semantics: `content`/`error` only overwrite when `Some`, a `Scraped`
/// update clears the stored error, and a `Retry` update bumps `retry_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ItemStatus,
    pub content: Option<String>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn scraped(content: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Scraped,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn retry(error: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Retry,
            content: None,
            error: Some(error.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Failed,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// Ephemeral work descriptor for scraping one item.
///
/// Created by the scheduler, consumed exactly once by a worker. The item's
/// persisted status stays the record of truth.
#[derive(Debug, Clone)]
pub struct ScrapeJob {
    pub item_id: Uuid,
    pub source: String,
    pub url: String,
    pub title: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: Instant,
}

impl ScrapeJob {
    pub fn from_item(item: &NewsItem, max_retries: u32) -> Self {
        Self {
            item_id: item.id,
            source: item.source.clone(),
            url: item.url.clone(),
            title: item.title.clone(),
            retry_count: item.retry_count,
            max_retries,
            enqueued_at: Instant::now(),
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Status to record when extraction fails for this job.
    pub fn failure_status(&self) -> ItemStatus {
        if self.can_retry() {
            ItemStatus::Retry
        } else {
            ItemStatus::Failed
        }
    }

    /// Time elapsed since the job was built for enqueueing.
    pub fn queue_wait(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}
