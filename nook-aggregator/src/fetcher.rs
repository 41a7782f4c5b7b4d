use crate::types::{AggregatorError, FetchConfig, FetchResult, Result, Source};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Shared HTTP access for every source adapter.
///
/// Failures are not retried here: a source that cannot be reached fails its
/// lane and the next run is the retry.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, source: Source, url: &str) -> Result<FetchResult> {
        self.send(source, url, self.client.get(url)).await
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, source: Source, url: &str) -> Result<T> {
        let result = self.get_text(source, url).await?;
        serde_json::from_str(&result.content).map_err(|e| {
            AggregatorError::Parse(format!("invalid JSON from {}: {}", url, e))
        })
    }

    /// Send a prepared request (custom headers, auth, POST bodies).
    ///
    /// Transport errors, non-success statuses and oversized bodies all map to
    /// `SourceUnreachable`; callers decide whether that is fatal for the lane.
    pub async fn send(&self, source: Source, url: &str, request: RequestBuilder) -> Result<FetchResult> {
        let start_time = Instant::now();
        let fetch_time = Utc::now();

        debug!("Fetching {} for {}", url, source);
        self.apply_rate_limit(url).await?;

        let response = request
            .send()
            .await
            .map_err(|e| AggregatorError::unreachable(source, describe_transport_error(url, &e)))?;

        let status = response.status();
        if !status.is_success() {
            let reason = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    format!("authentication rejected by {} (HTTP {})", url, status.as_u16())
                }
                StatusCode::TOO_MANY_REQUESTS => format!("rate limited by {}", url),
                _ => format!(
                    "HTTP {}: {} ({})",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                    url
                ),
            };
            warn!("{}", reason);
            return Err(AggregatorError::unreachable(source, reason));
        }

        let limit_bytes = self.config.max_body_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit_bytes {
                let size_mb = content_length as usize / (1024 * 1024);
                return Err(AggregatorError::unreachable(
                    source,
                    AggregatorError::ResponseTooLarge { size_mb },
                ));
            }
        }

        let content = response
            .text()
            .await
            .map_err(|e| AggregatorError::unreachable(source, describe_transport_error(url, &e)))?;
        if content.len() > limit_bytes {
            return Err(AggregatorError::unreachable(
                source,
                AggregatorError::ResponseTooLarge {
                    size_mb: content.len() / (1024 * 1024),
                },
            ));
        }

        let response_time_ms = start_time.elapsed().as_millis() as u64;
        info!("Fetched {} ({} bytes, {}ms)", url, content.len(), response_time_ms);

        Ok(FetchResult {
            url: url.to_string(),
            fetch_time,
            response_time_ms,
            http_status: status.as_u16(),
            content,
        })
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();
        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);

        // Reserve the next slot for this host, then sleep without the lock
        let wait_time = {
            let mut rate_limiter = self.rate_limiter.lock().await;
            let now = Instant::now();
            let slot = match rate_limiter.get(&host) {
                Some(last_slot) => (*last_slot + min_interval).max(now),
                None => now,
            };
            rate_limiter.insert(host.clone(), slot);
            slot.saturating_duration_since(now)
        };

        if !wait_time.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        Ok(())
    }
}

fn describe_transport_error(url: &str, error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timed out fetching {}", url)
    } else if error.is_connect() {
        format!("connection failed to {}: {}", url, error)
    } else {
        format!("request to {} failed: {}", url, error)
    }
}
