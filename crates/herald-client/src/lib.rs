pub mod article;
pub mod extractor;
pub mod feed;
pub mod fetcher;

pub use article::ArticleParser;
pub use extractor::HttpArticleExtractor;
pub use feed::{HttpFeedReader, parse_feed};
pub use fetcher::PageFetcher;
