use crate::config::HackerNewsConfig;
use crate::fetcher::Fetcher;
use crate::sources::{from_unix_seconds, selector, skip_malformed};
use crate::traits::{FetchWindow, SourceAdapter};
use crate::types::{AggregatorError, Item, Result, Source};
use crate::utils::text::{collapse_whitespace, excerpt, html_to_text};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scraper::Html;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const ARTICLE_TEXT_CHARS: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct HnStory {
    pub id: u64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub score: Option<i64>,
    pub by: Option<String>,
    pub descendants: Option<i64>,
    pub time: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub dead: bool,
}

/// Top stories from the Hacker News Firebase API.
pub struct HackerNewsAdapter {
    fetcher: Arc<Fetcher>,
    config: HackerNewsConfig,
}

impl HackerNewsAdapter {
    pub fn new(fetcher: Arc<Fetcher>, config: HackerNewsConfig) -> Self {
        Self { fetcher, config }
    }

    async fn fetch_story(&self, id: u64) -> Result<Item> {
        let url = format!("{}/item/{}.json", self.config.api_base, id);
        let body = self
            .fetcher
            .get_text(Source::Hackernews, &url)
            .await
            .map_err(|e| AggregatorError::malformed(Source::Hackernews, format!("story {}: {}", id, e)))?;
        let mut item = parse_story(&body.content)?;

        if item.raw_summary.is_none() && self.config.fetch_article_text && !item.url.contains("news.ycombinator.com") {
            match self.fetcher.get_text(Source::Hackernews, &item.url).await {
                Ok(page) => {
                    item = item.with_raw_summary(extract_article_text(&page.content));
                }
                Err(e) => debug!("No article text for {}: {}", item.url, e),
            }
        }
        Ok(item)
    }
}

#[async_trait]
impl SourceAdapter for HackerNewsAdapter {
    fn source(&self) -> Source {
        Source::Hackernews
    }

    async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Item>> {
        let url = format!("{}/topstories.json", self.config.api_base);
        let ids: Vec<u64> = self.fetcher.get_json(Source::Hackernews, &url).await.map_err(|e| match e {
            AggregatorError::Parse(reason) => AggregatorError::unreachable(Source::Hackernews, reason),
            other => other,
        })?;

        // buffered keeps the ranking order
        let results: Vec<Result<Item>> = stream::iter(ids.into_iter().take(self.config.limit))
            .map(|id| self.fetch_story(id))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut items = Vec::new();
        for result in results {
            match result {
                Ok(item) => items.push(item),
                Err(e) => skip_malformed(&e),
            }
        }

        info!("Fetched {} Hacker News stories", items.len());
        Ok(items)
    }
}

/// Map an `item/{id}.json` body to an item. Deleted, dead and untitled
/// entries are malformed.
pub fn parse_story(body: &str) -> Result<Item> {
    let story: Option<HnStory> = serde_json::from_str(body)
        .map_err(|e| AggregatorError::malformed(Source::Hackernews, e))?;
    let story = story.ok_or_else(|| AggregatorError::malformed(Source::Hackernews, "null item"))?;
    story_to_item(story)
}

pub fn story_to_item(story: HnStory) -> Result<Item> {
    if story.deleted || story.dead {
        return Err(AggregatorError::malformed(
            Source::Hackernews,
            format!("story {} is deleted or dead", story.id),
        ));
    }
    let title = story
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AggregatorError::malformed(Source::Hackernews, format!("story {} has no title", story.id)))?;

    let hn_url = format!("https://news.ycombinator.com/item?id={}", story.id);
    let url = story.url.filter(|u| !u.is_empty()).unwrap_or_else(|| hn_url.clone());

    Ok(Item::new(Source::Hackernews, story.id.to_string(), title, url)
        .with_published_at(story.time.and_then(|t| from_unix_seconds(t as f64)))
        .with_raw_summary(story.text.as_deref().map(html_to_text))
        .with_meta("score", story.score.unwrap_or(0))
        .with_meta("author", story.by.unwrap_or_default())
        .with_meta("comments", story.descendants.unwrap_or(0))
        .with_meta("hn_url", hn_url))
}

/// Meta description of a page, falling back to its first substantial paragraphs.
pub fn extract_article_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for css in ["meta[name='description']", "meta[property='og:description']"] {
        let Ok(sel) = selector(Source::Hackernews, css) else {
            continue;
        };
        if let Some(content) = document
            .select(&sel)
            .filter_map(|m| m.value().attr("content"))
            .map(html_to_text)
            .find(|c| !c.is_empty())
        {
            return Some(content);
        }
    }

    let paragraph = selector(Source::Hackernews, "p").ok()?;
    let text: Vec<String> = document
        .select(&paragraph)
        .map(|p| collapse_whitespace(&p.text().collect::<Vec<_>>().join(" ")))
        .filter(|p| p.chars().count() > 40)
        .take(3)
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(excerpt(&text.join("\n"), ARTICLE_TEXT_CHARS))
    }
}
