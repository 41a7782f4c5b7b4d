use crate::config::RedditConfig;
use crate::fetcher::Fetcher;
use crate::sources::{from_unix_seconds, skip_malformed};
use crate::traits::{FetchWindow, SourceAdapter};
use crate::types::{AggregatorError, Item, Result, Source};
use crate::utils::text::excerpt;
use crate::utils::time::reddit_time_filter;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".gif"];

/// Script-app credentials from the environment.
#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl RedditCredentials {
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AggregatorError::unreachable(Source::Reddit, format!("{} is not set", name)))
        };
        Ok(Self {
            client_id: read("REDDIT_CLIENT_ID")?,
            client_secret: read("REDDIT_CLIENT_SECRET")?,
            user_agent: read("REDDIT_USER_AGENT")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
pub struct Thing {
    #[serde(default)]
    pub kind: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RedditPost {
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub selftext: String,
    pub url: Option<String>,
    pub permalink: Option<String>,
    #[serde(default)]
    pub score: i64,
    pub author: Option<String>,
    #[serde(default)]
    pub num_comments: i64,
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub is_gallery: bool,
    pub poll_data: Option<serde_json::Value>,
    pub crosspost_parent: Option<String>,
}

impl RedditPost {
    pub fn post_type(&self) -> &'static str {
        let url = self.url.as_deref().unwrap_or("").to_ascii_lowercase();
        if self.is_video {
            "video"
        } else if self.is_gallery {
            "gallery"
        } else if self.poll_data.as_ref().is_some_and(|p| !p.is_null()) {
            "poll"
        } else if self.crosspost_parent.is_some() {
            "crosspost"
        } else if self.is_self {
            "text"
        } else if IMAGE_EXTENSIONS.iter().any(|ext| url.ends_with(ext)) {
            "image"
        } else {
            "link"
        }
    }
}

/// Top posts per configured subreddit through the OAuth API.
pub struct RedditAdapter {
    fetcher: Arc<Fetcher>,
    config: RedditConfig,
}

impl RedditAdapter {
    pub fn new(fetcher: Arc<Fetcher>, config: RedditConfig) -> Self {
        Self { fetcher, config }
    }

    async fn access_token(&self, credentials: &RedditCredentials) -> Result<String> {
        let request = self
            .fetcher
            .client()
            .post(&self.config.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .header(USER_AGENT, &credentials.user_agent)
            .form(&[("grant_type", "client_credentials")]);
        let response = self
            .fetcher
            .send(Source::Reddit, &self.config.token_url, request)
            .await?;
        let token: TokenResponse = serde_json::from_str(&response.content)
            .map_err(|e| AggregatorError::unreachable(Source::Reddit, format!("bad token response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn get_authorized(&self, url: &str, token: &str, credentials: &RedditCredentials) -> Result<String> {
        let request = self
            .fetcher
            .client()
            .get(url)
            .bearer_auth(token)
            .header(USER_AGENT, &credentials.user_agent);
        Ok(self.fetcher.send(Source::Reddit, url, request).await?.content)
    }

    async fn top_comment(&self, post_id: &str, token: &str, credentials: &RedditCredentials) -> Option<String> {
        let url = format!(
            "{}/comments/{}?sort=top&limit=1&depth=1",
            self.config.api_base, post_id
        );
        match self.get_authorized(&url, token, credentials).await {
            Ok(body) => parse_top_comment(&body),
            Err(e) => {
                debug!("No top comment for {}: {}", post_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn source(&self) -> Source {
        Source::Reddit
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Item>> {
        let credentials = RedditCredentials::from_env()?;
        let token = self.access_token(&credentials).await?;
        let time_filter = reddit_time_filter(window.lookback);

        let mut items = Vec::new();
        let mut failures = 0;
        let mut total = 0;

        for (category, subreddits) in &self.config.subreddits {
            for subreddit in subreddits {
                total += 1;
                // Ask for a couple extra so stickied posts do not eat the limit
                let url = format!(
                    "{}/r/{}/top?t={}&limit={}&raw_json=1",
                    self.config.api_base,
                    subreddit,
                    time_filter,
                    self.config.limit + 2
                );
                let body = match self.get_authorized(&url, &token, &credentials).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Failed to fetch r/{}: {}", subreddit, e);
                        failures += 1;
                        continue;
                    }
                };

                let posts = match parse_listing(&body, subreddit, category) {
                    Ok(posts) => posts,
                    Err(e) => {
                        warn!("{}", e);
                        failures += 1;
                        continue;
                    }
                };
                let mut posts = within_window(posts, window);
                posts.truncate(self.config.limit);

                for item in posts {
                    let post_id = item.meta_str("post_id").unwrap_or_default().to_string();
                    let comment = self.top_comment(&post_id, &token, &credentials).await;
                    items.push(with_comment(item, comment, self.config.comment_excerpt_chars));
                }
            }
        }

        if total > 0 && failures == total {
            return Err(AggregatorError::unreachable(Source::Reddit, "every subreddit request failed"));
        }

        sort_by_score(&mut items);
        info!("Fetched {} Reddit posts", items.len());
        Ok(items)
    }
}

/// `/top` only offers coarse ranges (`day`, `week`, ...), so drop posts older than the window.
pub fn within_window(posts: Vec<Item>, window: &FetchWindow) -> Vec<Item> {
    posts
        .into_iter()
        .filter(|post| post.published_at.map_or(true, |ts| window.contains(ts)))
        .collect()
}

/// Map a `/top` listing to items, skipping stickied and malformed posts.
pub fn parse_listing(body: &str, subreddit: &str, category: &str) -> Result<Vec<Item>> {
    let listing: Listing = serde_json::from_str(body)
        .map_err(|e| AggregatorError::unreachable(Source::Reddit, format!("bad listing for r/{}: {}", subreddit, e)))?;

    let mut items = Vec::new();
    for thing in listing.data.children {
        if thing.kind != "t3" {
            continue;
        }
        let post: RedditPost = match serde_json::from_value(thing.data) {
            Ok(post) => post,
            Err(e) => {
                skip_malformed(&AggregatorError::malformed(Source::Reddit, e));
                continue;
            }
        };
        if post.stickied {
            continue;
        }
        match post_to_item(post, subreddit, category) {
            Ok(item) => items.push(item),
            Err(e) => skip_malformed(&e),
        }
    }
    Ok(items)
}

fn post_to_item(post: RedditPost, subreddit: &str, category: &str) -> Result<Item> {
    let id = post
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AggregatorError::malformed(Source::Reddit, "post without id"))?;
    let title = post
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AggregatorError::malformed(Source::Reddit, format!("post {} without title", id)))?;

    let permalink = post
        .permalink
        .as_deref()
        .map(|p| format!("https://www.reddit.com{}", p))
        .unwrap_or_else(|| format!("https://www.reddit.com/r/{}/comments/{}", subreddit, id));
    let url = match (&post.url, post.is_self) {
        (Some(url), false) if !url.is_empty() => url.clone(),
        _ => permalink.clone(),
    };

    Ok(Item::new(Source::Reddit, format!("{}/{}", subreddit, id), title, url)
        .with_published_at(post.created_utc.and_then(from_unix_seconds))
        .with_raw_summary(Some(post.selftext.clone()))
        .with_meta("post_id", id)
        .with_meta("score", post.score)
        .with_meta("subreddit", subreddit)
        .with_meta("category", category)
        .with_meta("post_type", post.post_type())
        .with_meta("author", post.author.clone().unwrap_or_default())
        .with_meta("num_comments", post.num_comments)
        .with_meta("permalink", permalink))
}

/// First comment body from a `/comments/{id}` response.
pub fn parse_top_comment(body: &str) -> Option<String> {
    let listings: Vec<Listing> = serde_json::from_str(body).ok()?;
    listings
        .get(1)?
        .data
        .children
        .iter()
        .filter(|thing| thing.kind == "t1")
        .filter_map(|thing| thing.data.get("body").and_then(|b| b.as_str()))
        .map(str::trim)
        .find(|body| !body.is_empty() && *body != "[deleted]" && *body != "[removed]")
        .map(str::to_string)
}

/// Append the top comment excerpt to the post text.
pub fn with_comment(mut item: Item, comment: Option<String>, max_chars: usize) -> Item {
    let Some(comment) = comment else {
        return item;
    };
    let comment = format!("Top comment: {}", excerpt(&comment, max_chars));
    item.raw_summary = Some(match item.raw_summary.take() {
        Some(text) => format!("{}\n\n{}", text, comment),
        None => comment,
    });
    item
}

pub fn sort_by_score(items: &mut [Item]) {
    items.sort_by(|a, b| b.meta_i64("score").unwrap_or(0).cmp(&a.meta_i64("score").unwrap_or(0)));
}
