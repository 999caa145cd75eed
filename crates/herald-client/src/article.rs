//! Readable-article extraction from raw HTML.
//!
//! Metadata comes from OpenGraph / standard `<meta>` tags. The body is taken
//! from the first `<article>`, falling back to `<main>` and then `<body>`, and
//! converted to Markdown with non-content elements skipped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_core::models::ScrapedArticle;
use htmd::HtmlToMarkdown;
use scraper::{ElementRef, Html, Selector};

const NOT_READABLE: &str = "Article is not readable";
const EXCERPT_CHARS: usize = 280;

/// Turns an HTML document into a [`ScrapedArticle`].
#[derive(Clone)]
pub struct ArticleParser {
    converter: Arc<HtmlToMarkdown>,
}

impl ArticleParser {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form", "button",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    /// Parse `html` fetched from `url`. Never fails: an unreadable page
    /// yields an unsuccessful article.
    pub fn parse(&self, url: &str, html: &str) -> ScrapedArticle {
        let document = Html::parse_document(html);

        let Some(body_html) = content_root(&document).map(|el| el.inner_html()) else {
            return ScrapedArticle::failure(url, NOT_READABLE);
        };

        let content = match self.converter.convert(&body_html) {
            Ok(markdown) => markdown.trim().to_string(),
            Err(e) => {
                tracing::debug!(%url, error = %e, "Markdown conversion failed");
                return ScrapedArticle::failure(url, NOT_READABLE);
            }
        };
        if content.is_empty() {
            return ScrapedArticle::failure(url, NOT_READABLE);
        }

        let title = meta_content(&document, r#"meta[property="og:title"]"#)
            .or_else(|| element_text(&document, "title"))
            .unwrap_or_default();

        let mut article = ScrapedArticle::success(url, title, content);
        article.author = meta_content(&document, r#"meta[name="author"]"#)
            .or_else(|| meta_content(&document, r#"meta[property="article:author"]"#));
        article.published_at =
            meta_content(&document, r#"meta[property="article:published_time"]"#)
                .and_then(|raw| parse_timestamp(&raw));
        article.site_name = meta_content(&document, r#"meta[property="og:site_name"]"#);
        article.excerpt = meta_content(&document, r#"meta[name="description"]"#)
            .or_else(|| meta_content(&document, r#"meta[property="og:description"]"#))
            .or_else(|| Some(excerpt_of(&article.content)));
        article
    }
}

impl Default for ArticleParser {
    fn default() -> Self {
        Self::new()
    }
}

fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    ["article", "main", "body"].into_iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        document.select(&selector).next()
    })
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn element_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First paragraph of the Markdown body, cut at a char boundary.
fn excerpt_of(content: &str) -> String {
    let first = content
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .unwrap_or(content);
    first.chars().take(EXCERPT_CHARS).collect()
}
