use crate::config::TechFeedConfig;
use crate::fetcher::Fetcher;
use crate::normalizer::UndatedPolicy;
use crate::parser::{FeedParser, ParsedEntry};
use crate::traits::{FetchWindow, SourceAdapter};
use crate::types::{AggregatorError, Item, Result, Source};
use crate::utils::url::{is_http_url, link_id};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Technology blog RSS/Atom feeds.
pub struct TechFeedAdapter {
    fetcher: Arc<Fetcher>,
    config: TechFeedConfig,
}

impl TechFeedAdapter {
    pub fn new(fetcher: Arc<Fetcher>, config: TechFeedConfig) -> Self {
        Self { fetcher, config }
    }

    async fn pull_feed(&self, feed_url: &str, category: &str, window: &FetchWindow) -> Result<Vec<Item>> {
        let page = self.fetcher.get_text(Source::TechFeed, feed_url).await?;
        if !FeedParser::is_valid_feed_content(&page.content) {
            return Err(AggregatorError::unreachable(
                Source::TechFeed,
                format!("{} did not return a feed", feed_url),
            ));
        }
        let feed = FeedParser::new().parse_feed(&page.content).map_err(|e| {
            AggregatorError::unreachable(Source::TechFeed, format!("{}: {}", feed_url, e))
        })?;
        let feed_name = feed.title.clone().unwrap_or_else(|| feed_url.to_string());

        Ok(select_entries(
            feed.entries,
            window,
            self.config.undated,
            self.config.limit_per_feed,
        )
        .into_iter()
        .map(|entry| entry_to_item(entry, &feed_name, category))
        .collect())
    }
}

#[async_trait]
impl SourceAdapter for TechFeedAdapter {
    fn source(&self) -> Source {
        Source::TechFeed
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut total = 0;
        let mut failures = 0;

        for (category, feeds) in &self.config.feeds {
            for feed_url in feeds {
                total += 1;
                match self.pull_feed(feed_url, category, window).await {
                    Ok(entries) => {
                        debug!("{} yielded {} entries", feed_url, entries.len());
                        for item in entries {
                            if seen.insert(item.source_id.clone()) {
                                items.push(item);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Skipping feed {}: {}", feed_url, e);
                        failures += 1;
                    }
                }
            }
        }

        if total > 0 && failures == total {
            return Err(AggregatorError::unreachable(Source::TechFeed, "every configured feed failed"));
        }

        info!("Fetched {} feed entries from {} feeds", items.len(), total - failures);
        Ok(items)
    }
}

/// Entries inside the window (undated ones per `policy`), in feed order,
/// capped at `limit`. Entries whose link is not http(s) are dropped.
pub fn select_entries(
    entries: Vec<ParsedEntry>,
    window: &FetchWindow,
    policy: UndatedPolicy,
    limit: usize,
) -> Vec<ParsedEntry> {
    entries
        .into_iter()
        .filter(|entry| is_http_url(&entry.url))
        .filter(|entry| match entry.timestamp() {
            Some(ts) => window.contains(ts),
            None => policy == UndatedPolicy::Include,
        })
        .take(limit)
        .collect()
}

pub fn entry_to_item(entry: ParsedEntry, feed_name: &str, category: &str) -> Item {
    let published_at = entry.timestamp();
    let mut item = Item::new(Source::TechFeed, link_id(&entry.url), entry.title, entry.url)
        .with_published_at(published_at)
        .with_raw_summary(entry.summary)
        .with_meta("feed_name", feed_name)
        .with_meta("category", category);
    if let Some(author) = entry.authors.into_iter().next() {
        item = item.with_meta("author", author);
    }
    item
}
