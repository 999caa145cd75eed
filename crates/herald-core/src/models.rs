use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of running the content extractor against one URL.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapedArticle {
    pub url: String,
    pub title: String,
    /// Readable article body (Markdown)
    pub content: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl ScrapedArticle {
    pub fn success(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            author: None,
            published_at: None,
            excerpt: None,
            site_name: None,
            success: true,
            error: None,
        }
    }

    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            content: String::new(),
            author: None,
            published_at: None,
            excerpt: None,
            site_name: None,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Error text to record on the item; falls back to a generic message
    /// when the extractor reported failure without one.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Extraction failed")
    }
}
