use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::item::NewItem;

/// A configured news feed that the puller reads new items from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    /// Unique display name; stamped on every item discovered from this feed.
    pub name: String,
    /// Unique RSS/Atom feed URL.
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSource {
    pub name: String,
    pub url: String,
}

impl NewSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// One entry read from a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            published_at: None,
        }
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    /// Whether this entry should be kept given the newest publication time
    /// already stored for its source.
    ///
    /// Entries published at exactly `latest` are kept; the store drops the
    /// ones whose URL it already holds. Undated entries are always kept.
    pub fn is_newer_than(&self, latest: Option<DateTime<Utc>>) -> bool {
        match (self.published_at, latest) {
            (Some(published), Some(latest)) => published >= latest,
            _ => true,
        }
    }

    /// Item to insert for this entry, discovered on `source`.
    pub fn into_new_item(self, source: &str) -> NewItem {
        NewItem {
            source: source.to_string(),
            url: self.url,
            title: self.title,
            published_at: self.published_at,
        }
    }
}
