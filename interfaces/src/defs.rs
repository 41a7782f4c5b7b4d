use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Upstream content sources known to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Reddit,
    Hackernews,
    GithubTrending,
    TechFeed,
    Paper,
}

impl Source {
    /// Canonical run order.
    pub const ALL: [Source; 5] = [
        Source::GithubTrending,
        Source::Hackernews,
        Source::Reddit,
        Source::TechFeed,
        Source::Paper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Reddit => "reddit",
            Source::Hackernews => "hackernews",
            Source::GithubTrending => "github_trending",
            Source::TechFeed => "tech_feed",
            Source::Paper => "paper",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Reddit => "Reddit",
            Source::Hackernews => "Hacker News",
            Source::GithubTrending => "GitHub Trending",
            Source::TechFeed => "Tech Feed",
            Source::Paper => "arXiv Papers",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown source '{}'", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reddit" => Ok(Source::Reddit),
            "hackernews" | "hacker_news" => Ok(Source::Hackernews),
            "github_trending" | "github" => Ok(Source::GithubTrending),
            "tech_feed" | "techfeed" => Ok(Source::TechFeed),
            "paper" | "arxiv" => Ok(Source::Paper),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// Source-specific extras (score, stars_delta, author, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Identity of an item inside a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub source: Source,
    pub source_id: String,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.source_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub source_id: String,
    pub source: Source,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw_summary: Option<String>,
    #[serde(default)]
    pub generated_summary: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Item {
    pub fn new(source: Source, source_id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source,
            title: title.into(),
            url: url.into(),
            published_at: None,
            raw_summary: None,
            generated_summary: None,
            metadata: Metadata::new(),
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            source: self.source,
            source_id: self.source_id.clone(),
        }
    }

    /// True only for a summary with visible content.
    pub fn has_generated_summary(&self) -> bool {
        self.generated_summary
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_raw_summary(mut self, raw_summary: Option<String>) -> Self {
        self.raw_summary = raw_summary.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.as_i64())
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

// Object style note:
// Items are plain values. Adapters create them, the normalizer decides what
// happens to them, and only the store writes them down. Nothing outside the
// store holds on to a partition between runs.
