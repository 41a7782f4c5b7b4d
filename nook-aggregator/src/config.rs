use crate::fetcher::Fetcher;
use crate::generation::GenerationConfig;
use crate::normalizer::UndatedPolicy;
use crate::sources::{
    GithubTrendingAdapter, HackerNewsAdapter, PaperAdapter, RedditAdapter, TechFeedAdapter,
};
use crate::traits::SourceAdapter;
use crate::types::{FetchConfig, Source};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const CONFIG_ENV: &str = "NOOK_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/nook.toml";
/// One year.
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 365;

/// Accepts `1..=MAX_LOOKBACK_HOURS`.
pub fn check_lookback_hours(hours: i64) -> anyhow::Result<chrono::Duration> {
    if !(1..=MAX_LOOKBACK_HOURS).contains(&hours) {
        anyhow::bail!("lookback must be between 1 and {} hours, got {}", MAX_LOOKBACK_HOURS, hours);
    }
    chrono::Duration::try_hours(hours).context("lookback out of range")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub generation: GenerationConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub reddit: RedditConfig,
    pub hackernews: HackerNewsConfig,
    pub github_trending: GithubTrendingConfig,
    pub tech_feed: TechFeedConfig,
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub enabled: bool,
    /// Posts per subreddit
    pub limit: usize,
    pub lookback_hours: i64,
    /// Category name to subreddit names
    pub subreddits: BTreeMap<String, Vec<String>>,
    pub comment_excerpt_chars: usize,
    pub api_base: String,
    pub token_url: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        let mut subreddits = BTreeMap::new();
        subreddits.insert(
            "tech".to_string(),
            vec!["programming".to_string(), "rust".to_string()],
        );
        subreddits.insert(
            "ai".to_string(),
            vec!["MachineLearning".to_string(), "LocalLLaMA".to_string()],
        );
        Self {
            enabled: true,
            limit: 3,
            lookback_hours: 24,
            subreddits,
            comment_excerpt_chars: 500,
            api_base: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HackerNewsConfig {
    pub enabled: bool,
    pub limit: usize,
    pub lookback_hours: i64,
    /// Fill missing story text from the linked page
    pub fetch_article_text: bool,
    /// Parallel item requests
    pub concurrency: usize,
    pub api_base: String,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 30,
            lookback_hours: 24,
            fetch_article_text: false,
            concurrency: 8,
            api_base: "https://hacker-news.firebaseio.com/v0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubTrendingConfig {
    pub enabled: bool,
    /// Repositories per general language; specific languages get half
    pub limit: usize,
    pub lookback_hours: i64,
    /// An empty string means all languages
    pub general_languages: Vec<String>,
    pub specific_languages: Vec<String>,
    pub base_url: String,
}

impl Default for GithubTrendingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 10,
            lookback_hours: 24,
            general_languages: vec![String::new(), "python".to_string()],
            specific_languages: vec!["rust".to_string(), "go".to_string()],
            base_url: "https://github.com/trending".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TechFeedConfig {
    pub enabled: bool,
    pub limit_per_feed: usize,
    pub lookback_hours: i64,
    pub undated: UndatedPolicy,
    /// Category name to feed URLs
    pub feeds: BTreeMap<String, Vec<String>>,
}

impl Default for TechFeedConfig {
    fn default() -> Self {
        let mut feeds = BTreeMap::new();
        feeds.insert(
            "tech_blogs".to_string(),
            vec![
                "https://blog.rust-lang.org/feed.xml".to_string(),
                "https://github.blog/feed/".to_string(),
            ],
        );
        Self {
            enabled: true,
            limit_per_feed: 3,
            lookback_hours: 24,
            undated: UndatedPolicy::Include,
            feeds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub enabled: bool,
    /// Papers per category
    pub limit: usize,
    pub lookback_hours: i64,
    pub categories: Vec<String>,
    pub api_base: String,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 5,
            lookback_hours: 72,
            categories: vec!["cs.AI".to_string(), "cs.CL".to_string(), "cs.LG".to_string()],
            api_base: "https://export.arxiv.org/api/query".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, then `$NOOK_CONFIG`, then `config/nook.toml`.
    /// Falls back to defaults when none of them exists; an explicit path
    /// must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&env_path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::from_file(default_path);
        }
        info!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.generation.concurrency == 0 {
            anyhow::bail!("generation.concurrency must be at least 1");
        }
        for source in Source::ALL {
            check_lookback_hours(self.lookback_hours(source))
                .with_context(|| format!("invalid sources.{}.lookback_hours", source))?;
        }
        Ok(())
    }

    pub fn is_enabled(&self, source: Source) -> bool {
        match source {
            Source::Reddit => self.sources.reddit.enabled,
            Source::Hackernews => self.sources.hackernews.enabled,
            Source::GithubTrending => self.sources.github_trending.enabled,
            Source::TechFeed => self.sources.tech_feed.enabled,
            Source::Paper => self.sources.paper.enabled,
        }
    }

    pub fn enabled_sources(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|s| self.is_enabled(*s))
            .collect()
    }

    pub fn lookback_hours(&self, source: Source) -> i64 {
        match source {
            Source::Reddit => self.sources.reddit.lookback_hours,
            Source::Hackernews => self.sources.hackernews.lookback_hours,
            Source::GithubTrending => self.sources.github_trending.lookback_hours,
            Source::TechFeed => self.sources.tech_feed.lookback_hours,
            Source::Paper => self.sources.paper.lookback_hours,
        }
    }

    pub fn lookback(&self, source: Source) -> chrono::Duration {
        let hours = self.lookback_hours(source).clamp(1, MAX_LOOKBACK_HOURS);
        chrono::Duration::try_hours(hours).unwrap_or_else(|| chrono::Duration::hours(24))
    }

    pub fn undated_policy(&self, source: Source) -> UndatedPolicy {
        match source {
            Source::TechFeed => self.sources.tech_feed.undated,
            _ => UndatedPolicy::Include,
        }
    }

    /// One adapter per requested source.
    pub fn build_adapter(&self, source: Source, fetcher: Arc<Fetcher>) -> Arc<dyn SourceAdapter> {
        match source {
            Source::Reddit => Arc::new(RedditAdapter::new(fetcher, self.sources.reddit.clone())),
            Source::Hackernews => {
                Arc::new(HackerNewsAdapter::new(fetcher, self.sources.hackernews.clone()))
            }
            Source::GithubTrending => Arc::new(GithubTrendingAdapter::new(
                fetcher,
                self.sources.github_trending.clone(),
            )),
            Source::TechFeed => {
                Arc::new(TechFeedAdapter::new(fetcher, self.sources.tech_feed.clone()))
            }
            Source::Paper => Arc::new(PaperAdapter::new(fetcher, self.sources.paper.clone())),
        }
    }
}
