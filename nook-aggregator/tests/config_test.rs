mod common;

use common::init_tracing;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use nook_aggregator::{
    check_lookback_hours, AppConfig, FetchConfig, FetchWindow, Fetcher, Source, SourceAdapter,
    UndatedPolicy, MAX_LOOKBACK_HOURS,
};
use std::sync::Arc;

const SHIPPED_CONFIG: &str = include_str!("../../config/nook.toml");

#[test]
fn test_defaults() {
    let config = AppConfig::default();

    assert_eq!(config.enabled_sources(), Source::ALL.to_vec());
    assert_eq!(config.lookback_hours(Source::Paper), 72);
    assert_eq!(config.lookback_hours(Source::Reddit), 24);
    assert_eq!(config.generation.max_attempts, 3);
    assert_eq!(config.generation.max_input_chars, 4000);
    assert_eq!(config.fetch.timeout_seconds, 30);
    assert_eq!(config.undated_policy(Source::TechFeed), UndatedPolicy::Include);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = AppConfig::from_toml_str(
        r#"
        [storage]
        root = "/var/lib/nook"

        [sources.paper]
        limit = 12
        "#,
    )
    .unwrap();

    assert_eq!(config.storage.root.to_str(), Some("/var/lib/nook"));
    assert_eq!(config.sources.paper.limit, 12);
    assert_eq!(config.sources.paper.categories.len(), 3);
    assert_eq!(config.sources.hackernews.limit, 30);
    assert_eq!(config.generation.model, "grok-3-latest");
}

#[test]
fn test_invalid_values_are_rejected() {
    assert!(AppConfig::from_toml_str("[generation]\nconcurrency = 0\n").is_err());
    assert!(AppConfig::from_toml_str("[sources.reddit]\nlookback_hours = 0\n").is_err());
    assert!(AppConfig::from_toml_str("[sources.tech_feed]\nundated = \"sometimes\"\n").is_err());
    assert!(AppConfig::from_toml_str("not = [valid").is_err());
}

#[test]
fn test_lookback_is_bounded() {
    assert!(AppConfig::from_toml_str("[sources.paper]\nlookback_hours = 9223372036854775807\n").is_err());
    assert!(AppConfig::from_toml_str("[sources.hackernews]\nlookback_hours = 8761\n").is_err());
    assert!(AppConfig::from_toml_str("[sources.hackernews]\nlookback_hours = 8760\n").is_ok());

    assert_eq!(check_lookback_hours(36).unwrap(), Duration::hours(36));
    assert!(check_lookback_hours(0).is_err());
    assert!(check_lookback_hours(-5).is_err());
    assert!(check_lookback_hours(MAX_LOOKBACK_HOURS + 1).is_err());
    assert!(check_lookback_hours(i64::MAX).is_err());
}

#[test]
fn test_window_start_saturates() {
    let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let day = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let window = FetchWindow::new(day, Duration::hours(10_000_000_000), now);

    assert_eq!(window.start(), chrono::DateTime::<Utc>::UNIX_EPOCH);
    assert!(window.contains(now));
}

#[test]
fn test_shipped_config_parses() {
    init_tracing();
    let config = AppConfig::from_toml_str(SHIPPED_CONFIG).unwrap();

    assert_eq!(config.enabled_sources().len(), 5);
    assert!(config.sources.reddit.subreddits.contains_key("tech"));
    assert!(config.sources.hackernews.fetch_article_text);
    assert_eq!(config.sources.github_trending.general_languages[0], "");
    assert!(!config.sources.tech_feed.feeds.is_empty());
    assert_eq!(config.generation.api_key_env, "GROK_API_KEY");
}

#[test]
fn test_disabled_source_and_undated_policy() {
    let config = AppConfig::from_toml_str(
        r#"
        [sources.reddit]
        enabled = false

        [sources.tech_feed]
        undated = "exclude"
        lookback_hours = 48
        "#,
    )
    .unwrap();

    assert!(!config.is_enabled(Source::Reddit));
    assert!(!config.enabled_sources().contains(&Source::Reddit));
    assert_eq!(config.undated_policy(Source::TechFeed), UndatedPolicy::Exclude);
    assert_eq!(config.lookback(Source::TechFeed), Duration::hours(48));
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let missing = std::path::Path::new("/nonexistent/nook.toml");
    assert!(AppConfig::load(Some(missing)).is_err());
}

#[test]
fn test_build_adapter_per_source() {
    let config = AppConfig::default();
    let fetcher = Arc::new(Fetcher::new(FetchConfig::default()).unwrap());

    for source in Source::ALL {
        let adapter = config.build_adapter(source, fetcher.clone());
        assert_eq!(adapter.source(), source);
        assert_eq!(adapter.name(), source.display_name());
    }
}
