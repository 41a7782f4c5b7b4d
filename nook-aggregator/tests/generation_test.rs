mod common;

use common::{fast_generation_config, init_tracing, item, ScriptedBackend};
use nook_aggregator::generation::{classify_status, prompts};
use nook_aggregator::utils::text::truncate_at_word_boundary;
use nook_aggregator::{
    AggregatorError, GenerationBackend, GenerationClient, GenerationConfig, GenerationError,
    GenerationRequest, Item, MockGenerationBackend, RetryPolicy, Source,
};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn client(backend: Arc<ScriptedBackend>) -> GenerationClient {
    GenerationClient::new(backend, fast_generation_config()).with_policy(RetryPolicy::immediate(3))
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failures() {
    init_tracing();
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(GenerationError::Transient("503".to_string())),
        Err(GenerationError::Timeout(Duration::from_secs(1))),
        Ok("  回復した要約  ".to_string()),
    ]));
    let client = client(backend.clone());

    let generated = client.summarize_and_translate("Some English text", 1000).await.unwrap();

    assert_eq!(generated.text, "回復した要約");
    assert!(!generated.truncated);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(GenerationError::Transient("down".to_string())),
        Err(GenerationError::Transient("down".to_string())),
        Err(GenerationError::Transient("down".to_string())),
        Ok("too late".to_string()),
    ]));
    let client = client(backend.clone());

    let err = client.translate("hello").await.unwrap_err();

    assert!(matches!(err, AggregatorError::GenerationUnavailable { .. }));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_permanent_errors_are_not_retried() {
    for failure in [
        GenerationError::Auth("bad key".to_string()),
        GenerationError::MalformedInput("too long".to_string()),
    ] {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(failure)]));
        let client = client(backend.clone());

        assert!(client.translate("hello").await.is_err());
        assert_eq!(backend.calls(), 1);
    }
}

#[tokio::test]
async fn test_empty_completion_is_retried() {
    let backend = Arc::new(ScriptedBackend::new(vec![Ok("   ".to_string()), Ok("訳".to_string())]));
    let client = client(backend.clone());

    assert_eq!(client.translate("hi").await.unwrap().text, "訳");
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_retry_after_is_minimum_wait() {
    let backend = Arc::new(ScriptedBackend::new(vec![Err(GenerationError::RateLimited {
        retry_after: Some(Duration::from_millis(200)),
    })]));
    let client = client(backend.clone());

    let started = Instant::now();
    client.translate("hi").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_long_input_is_truncated_and_flagged() {
    let backend = Arc::new(ScriptedBackend::always_ok());
    let config = GenerationConfig {
        max_input_chars: 30,
        ..fast_generation_config()
    };
    let client = GenerationClient::new(backend.clone(), config).with_policy(RetryPolicy::immediate(1));

    let post = Item::new(Source::Reddit, "rust/abc", "Rust 2025", "https://example.com")
        .with_raw_summary(Some("alpha beta gamma delta epsilon zeta eta theta iota kappa".to_string()));
    let generated = client.generate_for_item(&post).await.unwrap();

    assert!(generated.truncated);
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("alpha beta gamma"));
    assert!(!requests[0].prompt.contains("kappa"));
    assert_eq!(requests[0].system.as_deref(), Some(prompts::SUMMARY_SYSTEM));
    assert_eq!(requests[0].target_language, "ja");

    let repo = Item::new(Source::GithubTrending, "acme/rocket", "acme/rocket", "https://github.com/acme/rocket")
        .with_raw_summary(Some("alpha beta gamma delta epsilon zeta eta theta iota kappa".to_string()));
    let generated = client.generate_for_item(&repo).await.unwrap();

    assert!(generated.truncated);
    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].system.is_none());
    assert!(!requests[1].prompt.contains("kappa"));
}

#[test]
fn test_truncate_at_word_boundary() {
    assert_eq!(truncate_at_word_boundary("short", 10), ("short".to_string(), false));
    assert_eq!(
        truncate_at_word_boundary("hello brave new world", 14),
        ("hello brave".to_string(), true)
    );

    // No spaces: cut on a character boundary, never inside a code point
    let japanese = "日本語のテキストを途中で切る";
    let (cut, truncated) = truncate_at_word_boundary(japanese, 5);
    assert!(truncated);
    assert_eq!(cut, "日本語のテ");
}

#[tokio::test]
async fn test_prompt_selection_by_source() {
    let backend = Arc::new(ScriptedBackend::always_ok());
    let client = client(backend.clone());

    let repo = Item::new(Source::GithubTrending, "acme/rocket", "acme/rocket", "https://github.com/acme/rocket")
        .with_raw_summary(Some("A blazing fast web framework".to_string()));
    client.generate_for_item(&repo).await.unwrap();

    let link_only = Item::new(Source::Hackernews, "1", "Show HN: Nook", "https://example.com");
    client.generate_for_item(&link_only).await.unwrap();

    let with_text = item(Source::Hackernews, "2");
    client.generate_for_item(&with_text).await.unwrap();

    let paper = item(Source::Paper, "2501.01234");
    client.generate_for_item(&paper).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 4);

    assert!(requests[0].system.is_none());
    assert!(requests[0].prompt.contains("A blazing fast web framework"));

    assert!(requests[1].system.is_none());
    assert!(requests[1].prompt.contains("Show HN: Nook"));

    assert!(requests[2].prompt.contains("Hacker News"));
    assert!(requests[2].prompt.contains("Raw text for 2"));

    assert!(requests[3].prompt.contains("論文"));
}

#[test]
fn test_classify_status() {
    let ra = Some(Duration::from_secs(7));
    assert_eq!(
        classify_status(StatusCode::TOO_MANY_REQUESTS, ra, String::new()),
        GenerationError::RateLimited { retry_after: ra }
    );
    assert!(matches!(
        classify_status(StatusCode::UNAUTHORIZED, None, String::new()),
        GenerationError::Auth(_)
    ));
    assert!(matches!(
        classify_status(StatusCode::PAYLOAD_TOO_LARGE, None, String::new()),
        GenerationError::MalformedInput(_)
    ));
    assert!(matches!(
        classify_status(StatusCode::GATEWAY_TIMEOUT, None, String::new()),
        GenerationError::Timeout(_)
    ));

    let server = classify_status(StatusCode::BAD_GATEWAY, None, String::new());
    assert!(matches!(server, GenerationError::Transient(_)));
    assert!(server.is_retryable());
    assert!(!GenerationError::Auth(String::new()).is_retryable());
}

#[tokio::test]
async fn test_mock_backend_output() {
    let backend = MockGenerationBackend::new();
    let request = GenerationRequest {
        system: None,
        prompt: "\nTranslate this line\nsecond line".to_string(),
        target_language: "ja".to_string(),
        max_tokens: 100,
        temperature: 0.3,
    };

    let text = backend.generate(&request).await.unwrap();
    assert_eq!(text, "[ja] Translate this line");
    assert_eq!(backend.backend_name(), "mock");
}
