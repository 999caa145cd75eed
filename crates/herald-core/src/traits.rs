use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::item::{ItemStatus, NewItem, NewsItem, StatusUpdate};
use crate::models::ScrapedArticle;
use crate::source::{FeedEntry, NewSource, Source};

/// Persistent store of news items and their scrape lifecycle.
///
/// Implementations must make `reserve_eligible` atomic (select + mark in one
/// transaction, e.g. `FOR UPDATE SKIP LOCKED`) so that two scheduling cycles
/// never reserve the same item. Item URLs are unique.
pub trait ItemStore: Send + Sync + Clone {
    /// Atomically take up to `batch_size` `Pending`/`Retry` items, newest
    /// first, and mark them `InQueue`.
    fn reserve_eligible(
        &self,
        batch_size: usize,
    ) -> impl Future<Output = Result<Vec<NewsItem>, AppError>> + Send;

    /// Items in the given status, newest first.
    fn list_by_status(
        &self,
        status: ItemStatus,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<NewsItem>, AppError>> + Send;

    /// Apply a worker's outcome to an item.
    ///
    /// Fails with `InvalidTransition` unless the item's current status may
    /// move to `update.status`, and with `NotFound` for an unknown id.
    fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Insert one `Pending` item; `AlreadyExists` if its URL is stored.
    fn create_item(
        &self,
        item: NewItem,
    ) -> impl Future<Output = Result<NewsItem, AppError>> + Send;

    /// Insert `Pending` items in one transaction, skipping URLs that are
    /// already stored or repeated within the batch. Returns how many were
    /// inserted.
    fn add_items(
        &self,
        items: Vec<NewItem>,
    ) -> impl Future<Output = Result<usize, AppError>> + Send;

    /// Newest `published_at` among the items discovered on `source`.
    fn latest_published_at(
        &self,
        source: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, AppError>> + Send;

    fn get_item(&self, id: Uuid) -> impl Future<Output = Result<Option<NewsItem>, AppError>> + Send;

    fn count_by_status(
        &self,
        status: ItemStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// Registered news feeds.
pub trait SourceStore: Send + Sync + Clone {
    /// All sources ordered by name.
    fn list_sources(&self) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;

    /// Register sources, skipping any whose name or URL is already taken
    /// (in the store or earlier in the batch). Returns how many were added.
    fn add_sources(
        &self,
        sources: Vec<NewSource>,
    ) -> impl Future<Output = Result<usize, AppError>> + Send;
}

/// Extracts readable article content from a URL.
///
/// A returned `Err` is treated like an article with `success == false`.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract(&self, url: &str) -> impl Future<Output = Result<ScrapedArticle, AppError>> + Send;
}

/// Downloads and parses an RSS or Atom feed.
pub trait FeedReader: Send + Sync + Clone {
    fn read_feed(
        &self,
        feed_url: &str,
    ) -> impl Future<Output = Result<Vec<FeedEntry>, AppError>> + Send;
}
