use crate::types::{AggregatorError, Item, Result, Source};
use crate::utils::text::{excerpt, truncate_at_word_boundary};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Longest input (in characters) sent to the backend
    pub max_input_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Parallel generation calls within one partition
    pub concurrency: usize,
    pub call_timeout_seconds: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.x.ai/v1/chat/completions".to_string(),
            model: "grok-3-latest".to_string(),
            api_key_env: "GROK_API_KEY".to_string(),
            max_input_chars: 4000,
            max_tokens: 1000,
            temperature: 0.3,
            concurrency: 4,
            call_timeout_seconds: 60,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub target_language: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Failure reported by a generation backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("input rejected: {0}")]
    MalformedInput(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. }
                | GenerationError::Transient(_)
                | GenerationError::Timeout(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Trait for text generation backends (chat completion APIs, mocks)
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn backend_name(&self) -> String;

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError>;
}

/// Output of one successful generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    /// Input was cut to fit `max_input_chars` before the call
    pub truncated: bool,
}

/// Bounded exponential backoff shared by every generation call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_interval: Duration::from_millis(config.initial_backoff_ms),
            max_interval: Duration::from_millis(config.max_backoff_ms),
            multiplier: 2.0,
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 2.0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// A server-supplied retry-after is the minimum wait before the next try.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> std::result::Result<T, GenerationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, GenerationError>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.max_interval)
                        .max(e.retry_after().unwrap_or(Duration::ZERO));
                    warn!("Generation attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Summarization and Japanese translation on top of a backend.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
    config: GenerationConfig,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: GenerationConfig) -> Self {
        Self {
            backend,
            policy: RetryPolicy::from_config(&config),
            config,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn backend_name(&self) -> String {
        self.backend.backend_name()
    }

    /// Summarize `text` in Japanese.
    pub async fn summarize_and_translate(&self, text: &str, max_input_len: usize) -> Result<Generated> {
        let (body, truncated) = truncate_at_word_boundary(text, max_input_len);
        let prompt = format!("{}\n\n{}", prompts::GENERIC_SUMMARY, body);
        let text = self.call(Some(prompts::SUMMARY_SYSTEM), prompt).await?;
        Ok(Generated { text, truncated })
    }

    /// Translate `text` into Japanese.
    pub async fn translate(&self, text: &str) -> Result<Generated> {
        self.translate_cut(text, false).await
    }

    /// `already_cut` records a truncation made before `text` got here.
    async fn translate_cut(&self, text: &str, already_cut: bool) -> Result<Generated> {
        let (body, truncated) = truncate_at_word_boundary(text, self.config.max_input_chars);
        let text = self.call(None, prompts::translation(&body)).await?;
        Ok(Generated {
            text,
            truncated: truncated || already_cut,
        })
    }

    /// Produce the stored summary for one item, picking the prompt by source.
    pub async fn generate_for_item(&self, item: &Item) -> Result<Generated> {
        let max = self.config.max_input_chars;
        let body = item.raw_summary.as_deref().unwrap_or("");
        let (body, truncated) = truncate_at_word_boundary(body, max);

        let (system, prompt) = match item.source {
            Source::Reddit => (Some(prompts::SUMMARY_SYSTEM), prompts::reddit(item, &body)),
            Source::TechFeed => (Some(prompts::SUMMARY_SYSTEM), prompts::tech_feed(item, &body)),
            Source::Paper => (Some(prompts::SUMMARY_SYSTEM), prompts::paper(item, &body)),
            Source::Hackernews if !body.is_empty() => {
                (Some(prompts::SUMMARY_SYSTEM), prompts::hacker_news(item, &body))
            }
            Source::Hackernews => return self.translate(&item.title).await,
            Source::GithubTrending => {
                let text = if body.is_empty() { item.title.as_str() } else { body.as_str() };
                return self.translate_cut(text, truncated).await;
            }
        };

        debug!(source = %item.source, id = %item.source_id, truncated, "Requesting summary");
        let text = self.call(system, prompt).await?;
        Ok(Generated { text, truncated })
    }

    async fn call(&self, system: Option<&str>, prompt: String) -> Result<String> {
        let request = GenerationRequest {
            system: system.map(str::to_string),
            prompt,
            target_language: "ja".to_string(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let timeout = Duration::from_secs(self.config.call_timeout_seconds);
        let backend = self.backend.as_ref();
        let request = &request;

        let outcome = self
            .policy
            .run(|_| async move {
                let text = tokio::time::timeout(timeout, backend.generate(request))
                    .await
                    .map_err(|_| GenerationError::Timeout(timeout))??;
                if text.trim().is_empty() {
                    return Err(GenerationError::Transient("empty completion".to_string()));
                }
                Ok(text.trim().to_string())
            })
            .await;

        outcome.map_err(|e| AggregatorError::GenerationUnavailable {
            reason: format!("{}: {}", self.backend.backend_name(), e),
        })
    }
}

/// Prompt templates. Output is always Japanese.
pub mod prompts {
    use crate::types::Item;

    pub const SUMMARY_SYSTEM: &str = "あなたは技術コンテンツの要約を行うアシスタントです。\
与えられた内容を分析し、簡潔で情報量の多い要約を作成してください。\
技術的な内容は正確に、一般的な内容は分かりやすく要約してください。\
回答は必ず日本語で行ってください。専門用語は適切に翻訳し、必要に応じて英語の専門用語を括弧内に残してください。";

    pub const GENERIC_SUMMARY: &str = "以下のテキストを日本語で簡潔に要約してください。";

    pub fn translation(text: &str) -> String {
        format!(
            "以下の英語のテキストを自然な日本語に翻訳してください。\
専門用語や固有名詞は適切に翻訳し、必要に応じて英語の原語を括弧内に残してください。\
翻訳文のみを出力してください。\n\n{}",
            text
        )
    }

    fn or_none(body: &str) -> &str {
        if body.is_empty() {
            "(本文なし)"
        } else {
            body
        }
    }

    pub fn reddit(item: &Item, body: &str) -> String {
        format!(
            "以下のReddit投稿を要約してください。\n\n\
タイトル: {}\n本文: {}\nURL: {}\n\n\
要約は以下の形式で行い、日本語で回答してください:\n\
1. 投稿の主な内容(1-2文)\n\
2. 重要なポイント(箇条書き3-5点)\n\
3. コメントから読み取れる反応",
            item.title,
            or_none(body),
            item.url
        )
    }

    pub fn tech_feed(item: &Item, body: &str) -> String {
        format!(
            "以下の技術ブログの記事を要約してください。\n\n\
タイトル: {}\n本文: {}\n\n\
要約は以下の形式で行い、日本語で回答してください:\n\
1. 記事の主な内容(1-2文)\n\
2. 重要なポイント(箇条書き3-5点)\n\
3. 技術的な洞察",
            item.title,
            or_none(body)
        )
    }

    pub fn paper(item: &Item, body: &str) -> String {
        format!(
            "以下の論文を要約してください。\n\n\
タイトル: {}\nアブストラクト: {}\n\n\
要約は以下の形式で行い、日本語で回答してください:\n\
1. 研究の目的と背景\n\
2. 提案手法の概要\n\
3. 主な結果と貢献\n\
4. 将来の研究への示唆",
            item.title,
            or_none(body)
        )
    }

    pub fn hacker_news(item: &Item, body: &str) -> String {
        format!(
            "以下のHacker Newsの記事を日本語で2-3文に要約してください。\n\n\
タイトル: {}\n本文: {}\nURL: {}",
            item.title, body, item.url
        )
    }
}

/// Backend for OpenAI-compatible `/chat/completions` endpoints (xAI by default).
pub struct ChatCompletionsBackend {
    http: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsBackend {
    pub fn new(endpoint: String, model: String, api_key: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            model,
            api_key,
        })
    }

    /// Build from config, reading the key from `api_key_env`.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AggregatorError::Config(format!("missing {} environment variable", config.api_key_env))
            })?;
        info!("Using generation endpoint {} ({})", config.endpoint, config.model);
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            Duration::from_secs(config.call_timeout_seconds),
        )
    }
}

#[async_trait]
impl GenerationBackend for ChatCompletionsBackend {
    fn backend_name(&self) -> String {
        format!("chat-completions ({})", self.model)
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(Duration::ZERO)
                } else {
                    GenerationError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, excerpt(&detail, 200)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transient(format!("unreadable completion: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Map an HTTP failure status onto the generation error taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, detail: String) -> GenerationError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::Auth(detail),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            GenerationError::MalformedInput(detail)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            GenerationError::Timeout(Duration::ZERO)
        }
        s if s.is_server_error() => GenerationError::Transient(format!("HTTP {}: {}", s.as_u16(), detail)),
        s => GenerationError::MalformedInput(format!("HTTP {}: {}", s.as_u16(), detail)),
    }
}

/// Offline backend for development and `--mock-generation` runs.
pub struct MockGenerationBackend {
    response_delay_ms: u64,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self { response_delay_ms: 0 }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    fn backend_name(&self) -> String {
        "mock".to_string()
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }
        let first_line = request
            .prompt
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        Ok(format!("[{}] {}", request.target_language, excerpt(first_line.trim(), 120)))
    }
}
