use crate::config::GithubTrendingConfig;
use crate::fetcher::Fetcher;
use crate::sources::{selector, skip_malformed};
use crate::traits::{FetchWindow, SourceAdapter};
use crate::types::{AggregatorError, Item, Result, Source};
use crate::utils::text::collapse_whitespace;
use crate::utils::time::github_since;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Repositories scraped from the GitHub trending pages.
pub struct GithubTrendingAdapter {
    fetcher: Arc<Fetcher>,
    config: GithubTrendingConfig,
}

impl GithubTrendingAdapter {
    pub fn new(fetcher: Arc<Fetcher>, config: GithubTrendingConfig) -> Self {
        Self { fetcher, config }
    }

    /// (language, limit) pairs in request order.
    fn scopes(&self) -> Vec<(String, usize)> {
        let general = self
            .config
            .general_languages
            .iter()
            .map(|lang| (lang.clone(), self.config.limit));
        let specific = self
            .config
            .specific_languages
            .iter()
            .map(|lang| (lang.clone(), self.config.limit / 2));
        general.chain(specific).filter(|(_, limit)| *limit > 0).collect()
    }
}

#[async_trait]
impl SourceAdapter for GithubTrendingAdapter {
    fn source(&self) -> Source {
        Source::GithubTrending
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Item>> {
        let since = github_since(window.lookback);
        let scopes = self.scopes();

        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut failures = 0;

        for (language, limit) in &scopes {
            let url = if language.is_empty() {
                format!("{}?since={}", self.config.base_url, since)
            } else {
                format!("{}/{}?since={}", self.config.base_url, language, since)
            };

            let page = match self.fetcher.get_text(Source::GithubTrending, &url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Failed to fetch trending page {}: {}", url, e);
                    failures += 1;
                    continue;
                }
            };

            let scope = if language.is_empty() { "all" } else { language.as_str() };
            for item in parse_trending_page(&page.content, scope, *limit, page.fetch_time)? {
                if seen.insert(item.source_id.clone()) {
                    items.push(item);
                }
            }
        }

        if !scopes.is_empty() && failures == scopes.len() {
            return Err(AggregatorError::unreachable(
                Source::GithubTrending,
                "every trending page request failed",
            ));
        }

        info!("Fetched {} trending repositories", items.len());
        Ok(items)
    }
}

/// Parse one trending page into at most `limit` repositories.
pub fn parse_trending_page(html: &str, scope: &str, limit: usize, fetched_at: DateTime<Utc>) -> Result<Vec<Item>> {
    let document = Html::parse_document(html);
    let row = selector(Source::GithubTrending, "article.Box-row")?;

    let mut items = Vec::new();
    for element in document.select(&row).take(limit) {
        match parse_repository(element, scope, fetched_at) {
            Ok(item) => items.push(item),
            Err(e) => skip_malformed(&e),
        }
    }
    Ok(items)
}

fn parse_repository(row: ElementRef<'_>, scope: &str, fetched_at: DateTime<Utc>) -> Result<Item> {
    let source = Source::GithubTrending;
    let name_sel = selector(source, "h2 a")?;
    let description_sel = selector(source, "p")?;
    let language_sel = selector(source, "span[itemprop='programmingLanguage']")?;
    let stars_sel = selector(source, "a[href$='/stargazers']")?;
    let forks_sel = selector(source, "a[href$='/forks']")?;
    let delta_sel = selector(source, "span.float-sm-right")?;

    let href = row
        .select(&name_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or_else(|| AggregatorError::malformed(source, "row without repository link"))?;
    let full_name = href.trim_matches('/').to_string();
    if full_name.split('/').count() != 2 {
        return Err(AggregatorError::malformed(source, format!("unexpected repository link {}", href)));
    }

    let text_of = |el: ElementRef<'_>| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));

    let stars_delta = row
        .select(&delta_sel)
        .next()
        .map(text_of)
        .and_then(|t| parse_count(&t))
        .ok_or_else(|| AggregatorError::malformed(source, format!("{} has no star delta", full_name)))?;

    let description = row.select(&description_sel).next().map(text_of);
    let language = row.select(&language_sel).next().map(text_of);
    let stars = row.select(&stars_sel).next().map(text_of).and_then(|t| parse_count(&t));
    let forks = row.select(&forks_sel).next().map(text_of).and_then(|t| parse_count(&t));

    let mut item = Item::new(
        source,
        full_name.clone(),
        full_name.clone(),
        format!("https://github.com/{}", full_name),
    )
    .with_published_at(Some(fetched_at))
    .with_raw_summary(description)
    .with_meta("stars_delta", stars_delta)
    .with_meta("stars", stars.unwrap_or(0))
    .with_meta("forks", forks.unwrap_or(0))
    .with_meta("trending_scope", scope);
    if let Some(language) = language.filter(|l| !l.is_empty()) {
        item = item.with_meta("language", language);
    }
    Ok(item)
}

/// First number in text such as "1,234 stars today".
pub fn parse_count(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    digits.parse().ok()
}
