//! RSS 2.0 and Atom feed reading.
//!
//! Both formats are deserialized into one document shape: RSS puts its items
//! under `<channel>`, Atom puts `<entry>` elements directly under the root.

use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_core::error::AppError;
use herald_core::source::FeedEntry;
use herald_core::traits::FeedReader;
use serde::Deserialize;
use url::Url;

use crate::fetcher::PageFetcher;

#[derive(Debug, Deserialize)]
struct FeedDocument {
    channel: Option<RssChannel>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<RssGuid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RssGuid {
    #[serde(rename = "@isPermaLink")]
    is_perma_link: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl RssItem {
    fn link(&self) -> Option<&str> {
        let link = self.link.as_deref().map(str::trim).filter(|l| !l.is_empty());
        link.or_else(|| {
            let guid = self.guid.as_ref()?;
            let permalink = !matches!(guid.is_perma_link.as_deref(), Some("false"));
            Some(guid.value.trim()).filter(|v| permalink && !v.is_empty())
        })
    }
}

impl AtomEntry {
    /// The `alternate` link, or the first link without a `rel`.
    fn link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .and_then(|l| l.href.as_deref())
            .map(str::trim)
            .filter(|href| !href.is_empty())
    }
}

/// Parse an RSS or Atom document fetched from `feed_url`.
///
/// Relative entry links are resolved against `feed_url`. Entries without a
/// link are dropped; unparsable dates are treated as missing.
pub fn parse_feed(feed_url: &str, xml: &str) -> Result<Vec<FeedEntry>, AppError> {
    let document: FeedDocument = quick_xml::de::from_str(xml)
        .map_err(|e| AppError::FeedError(format!("{feed_url}: {e}")))?;
    let base = Url::parse(feed_url).ok();

    let entries = match document.channel {
        Some(channel) => channel
            .items
            .iter()
            .filter_map(|item| {
                let url = resolve(base.as_ref(), item.link()?);
                let entry = FeedEntry::new(clean_title(item.title.as_deref()), url);
                Some(with_date(entry, item.pub_date.as_deref()))
            })
            .collect(),
        None if !document.entries.is_empty() => document
            .entries
            .iter()
            .filter_map(|item| {
                let url = resolve(base.as_ref(), item.link()?);
                let title = item.title.as_ref().map(|t| t.value.as_str());
                let entry = FeedEntry::new(clean_title(title), url);
                let date = item.published.as_deref().or(item.updated.as_deref());
                Some(with_date(entry, date))
            })
            .collect(),
        None => {
            return Err(AppError::FeedError(format!(
                "{feed_url}: no RSS channel or Atom entries found"
            )));
        }
    };

    Ok(entries)
}

fn resolve(base: Option<&Url>, link: &str) -> String {
    base.and_then(|base| base.join(link).ok())
        .map(String::from)
        .unwrap_or_else(|| link.to_string())
}

fn clean_title(title: Option<&str>) -> String {
    title
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn with_date(entry: FeedEntry, raw: Option<&str>) -> FeedEntry {
    match raw.and_then(parse_date) {
        Some(published) => entry.with_published_at(published),
        None => entry,
    }
}

/// RFC 2822 (RSS `pubDate`) or RFC 3339 (Atom).
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// [`FeedReader`] that downloads feeds over HTTP.
#[derive(Clone)]
pub struct HttpFeedReader {
    fetcher: PageFetcher,
}

impl HttpFeedReader {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            fetcher: PageFetcher::new()?,
        })
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            fetcher: PageFetcher::with_timeout(timeout)?,
        })
    }
}

impl FeedReader for HttpFeedReader {
    async fn read_feed(&self, feed_url: &str) -> Result<Vec<FeedEntry>, AppError> {
        let xml = self.fetcher.fetch(feed_url).await?;
        let entries = parse_feed(feed_url, &xml)?;
        tracing::debug!(%feed_url, entries = entries.len(), "Read feed");
        Ok(entries)
    }
}
