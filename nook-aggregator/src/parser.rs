use crate::types::{AggregatorError, Result};
use crate::utils::text::html_to_text;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    /// Feed-supplied id (RSS guid, Atom id). May be empty.
    pub guid: String,
    pub url: String,
    pub title: String,
    /// Plain-text summary, falling back to the content body
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

impl ParsedEntry {
    /// Publication time, or the update time when the feed only carries that.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.published_at.or(self.updated_at)
    }
}

/// RSS/Atom parsing shared by the feed and paper sources.
pub struct FeedParser {
    seen_urls: HashSet<String>,
}

impl FeedParser {
    pub fn new() -> Self {
        Self {
            seen_urls: HashSet::new(),
        }
    }

    pub fn parse_feed(&mut self, content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let entries: Vec<ParsedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        info!("Parsed feed with {} entries", entries.len());
        Ok(ParsedFeed { title, entries })
    }

    fn parse_entry(&mut self, entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        // Entries without a title or link cannot become items
        let title = entry
            .title
            .map(|t| html_to_text(&t.content))
            .filter(|t| !t.is_empty())?;

        // Atom may carry several links; prefer rel="alternate"
        let url = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
            .or_else(|| entry.links.first())?
            .href
            .clone();

        if !self.seen_urls.insert(url.clone()) {
            debug!("Skipping duplicate entry with URL: {}", url);
            return None;
        }

        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|body| html_to_text(&body))
            .filter(|s| !s.is_empty());

        Some(ParsedEntry {
            guid: entry.id,
            url,
            title,
            summary,
            authors: entry.authors.into_iter().map(|a| a.name).collect(),
            published_at: entry.published.map(|dt| dt.with_timezone(&Utc)),
            updated_at: entry.updated.map(|dt| dt.with_timezone(&Utc)),
            categories: entry.categories.into_iter().map(|c| c.term).collect(),
        })
    }

    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();
        content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("<rdf:rdf")
            || content_lower.contains("<channel")
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}
