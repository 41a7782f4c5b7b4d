use crate::config::PaperConfig;
use crate::fetcher::Fetcher;
use crate::parser::{FeedParser, ParsedEntry};
use crate::sources::skip_malformed;
use crate::traits::{FetchWindow, SourceAdapter};
use crate::types::{AggregatorError, Item, Result, Source};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Recent arXiv submissions per category, via the Atom query API.
pub struct PaperAdapter {
    fetcher: Arc<Fetcher>,
    config: PaperConfig,
}

impl PaperAdapter {
    pub fn new(fetcher: Arc<Fetcher>, config: PaperConfig) -> Self {
        Self { fetcher, config }
    }

    fn query_url(&self, category: &str) -> String {
        format!(
            "{}?search_query=cat:{}&sortBy=submittedDate&sortOrder=descending&start=0&max_results={}",
            self.config.api_base, category, self.config.limit
        )
    }
}

#[async_trait]
impl SourceAdapter for PaperAdapter {
    fn source(&self) -> Source {
        Source::Paper
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut failures = 0;

        for category in &self.config.categories {
            let url = self.query_url(category);
            let parsed = match self.fetcher.get_text(Source::Paper, &url).await {
                Ok(page) => parse_atom(&page.content),
                Err(e) => Err(e),
            };
            let papers = match parsed {
                Ok(papers) => papers,
                Err(e) => {
                    warn!("Failed to query arXiv category {}: {}", category, e);
                    failures += 1;
                    continue;
                }
            };

            for paper in papers {
                let in_window = paper.published_at.map_or(true, |ts| window.contains(ts));
                if in_window && seen.insert(paper.source_id.clone()) {
                    items.push(paper);
                }
            }
        }

        if !self.config.categories.is_empty() && failures == self.config.categories.len() {
            return Err(AggregatorError::unreachable(Source::Paper, "every arXiv query failed"));
        }

        info!("Fetched {} papers", items.len());
        Ok(items)
    }
}

/// Parse an arXiv Atom response.
pub fn parse_atom(content: &str) -> Result<Vec<Item>> {
    let feed = FeedParser::new()
        .parse_feed(content)
        .map_err(|e| AggregatorError::unreachable(Source::Paper, e))?;

    let mut items = Vec::new();
    for entry in feed.entries {
        match entry_to_item(entry) {
            Ok(item) => items.push(item),
            Err(e) => skip_malformed(&e),
        }
    }
    Ok(items)
}

fn entry_to_item(entry: ParsedEntry) -> Result<Item> {
    let id = arxiv_id(&entry.guid)
        .or_else(|| arxiv_id(&entry.url))
        .ok_or_else(|| AggregatorError::malformed(Source::Paper, format!("no arXiv id in {}", entry.guid)))?;

    let pdf_url = format!("https://arxiv.org/pdf/{}", id);
    let abs_url = format!("https://arxiv.org/abs/{}", id);

    Ok(Item::new(Source::Paper, id, entry.title, abs_url)
        .with_published_at(entry.published_at.or(entry.updated_at))
        .with_raw_summary(entry.summary)
        .with_meta("authors", entry.authors)
        .with_meta("categories", entry.categories)
        .with_meta("pdf_url", pdf_url))
}

/// arXiv identifier from an abs/pdf URL, without the version suffix.
///
/// `http://arxiv.org/abs/2401.01234v2` gives `2401.01234`; old-style ids such
/// as `hep-th/9901001v1` keep their archive prefix.
pub fn arxiv_id(link: &str) -> Option<String> {
    let (_, rest) = link.split_once("/abs/").or_else(|| link.split_once("/pdf/"))?;
    let rest = rest.trim_end_matches('/').trim_end_matches(".pdf");
    if rest.is_empty() {
        return None;
    }

    let id = match rest.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < rest.len()
                && rest[pos + 1..].chars().all(|c| c.is_ascii_digit())
                && rest[..pos].ends_with(|c: char| c.is_ascii_digit()) =>
        {
            &rest[..pos]
        }
        _ => rest,
    };
    Some(id.to_string())
}
