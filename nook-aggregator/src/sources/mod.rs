pub mod github_trending;
pub mod hacker_news;
pub mod paper;
pub mod reddit;
pub mod tech_feed;

pub use github_trending::GithubTrendingAdapter;
pub use hacker_news::HackerNewsAdapter;
pub use paper::PaperAdapter;
pub use reddit::RedditAdapter;
pub use tech_feed::TechFeedAdapter;

use crate::types::{AggregatorError, Source};
use chrono::{DateTime, TimeZone, Utc};
use scraper::Selector;
use tracing::warn;

pub(crate) fn skip_malformed(error: &AggregatorError) {
    warn!("Skipping record: {}", error);
}

pub(crate) fn selector(source: Source, css: &str) -> crate::types::Result<Selector> {
    Selector::parse(css).map_err(|e| AggregatorError::malformed(source, format!("bad selector {}: {}", css, e)))
}

pub(crate) fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs as i64, 0).single()
}
