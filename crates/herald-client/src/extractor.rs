use std::time::Duration;

use herald_core::error::AppError;
use herald_core::models::ScrapedArticle;
use herald_core::traits::ContentExtractor;

use crate::article::ArticleParser;
use crate::fetcher::PageFetcher;

/// [`ContentExtractor`] that downloads a page over HTTP and parses it locally.
///
/// Fetch failures (network errors, non-2xx status, timeouts) are reported as
/// unsuccessful articles, so the pipeline records them on the item and
/// decides about retries.
#[derive(Clone)]
pub struct HttpArticleExtractor {
    fetcher: PageFetcher,
    parser: ArticleParser,
}

impl HttpArticleExtractor {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            fetcher: PageFetcher::new()?,
            parser: ArticleParser::new(),
        })
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            fetcher: PageFetcher::with_timeout(timeout)?,
            parser: ArticleParser::new(),
        })
    }
}

impl ContentExtractor for HttpArticleExtractor {
    async fn extract(&self, url: &str) -> Result<ScrapedArticle, AppError> {
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(%url, error = %e, "Failed to fetch article");
                return Ok(ScrapedArticle::failure(url, e.to_string()));
            }
        };

        let article = self.parser.parse(url, &html);
        if article.success {
            tracing::debug!(
                %url,
                title = %article.title,
                content_len = article.content.len(),
                "Extracted article"
            );
        } else {
            tracing::info!(%url, error = article.error_message(), "Article not extractable");
        }
        Ok(article)
    }
}
