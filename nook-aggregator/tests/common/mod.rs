#![allow(dead_code)]

use async_trait::async_trait;
use nook_aggregator::{
    AggregatorError, FetchWindow, GenerationBackend, GenerationConfig, GenerationError,
    GenerationRequest, Item, Source, SourceAdapter,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn item(source: Source, id: &str) -> Item {
    Item::new(
        source,
        id,
        format!("Title {}", id),
        format!("https://example.com/{}/{}", source, id),
    )
    .with_raw_summary(Some(format!("Raw text for {}", id)))
}

/// Generation config that never waits between attempts.
pub fn fast_generation_config() -> GenerationConfig {
    GenerationConfig {
        max_attempts: 3,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
        call_timeout_seconds: 5,
        ..GenerationConfig::default()
    }
}

/// Backend that replays scripted outcomes, then answers with a fixed summary.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn backend_name(&self) -> String {
        "scripted".to_string()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("日本語の要約".to_string()))
    }
}

/// Backend that fails with a transient error until switched on.
pub struct SwitchableBackend {
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableBackend {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for SwitchableBackend {
    fn backend_name(&self) -> String {
        "switchable".to_string()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(format!("要約: {}", request.prompt.lines().next().unwrap_or("")))
        } else {
            Err(GenerationError::Transient("backend down".to_string()))
        }
    }
}

/// What a `StaticAdapter` does when asked to fetch.
pub enum Behavior {
    Items(Vec<Item>),
    Unreachable,
    Panic,
    Slow(Duration),
}

pub struct StaticAdapter {
    source: Source,
    behavior: Behavior,
    fetches: AtomicUsize,
    last_window: Mutex<Option<FetchWindow>>,
}

impl StaticAdapter {
    pub fn new(source: Source, behavior: Behavior) -> Self {
        Self {
            source,
            behavior,
            fetches: AtomicUsize::new(0),
            last_window: Mutex::new(None),
        }
    }

    pub fn with_items(source: Source, items: Vec<Item>) -> Self {
        Self::new(source, Behavior::Items(items))
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn last_window(&self) -> Option<FetchWindow> {
        *self.last_window.lock().unwrap()
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch(&self, window: &FetchWindow) -> nook_aggregator::Result<Vec<Item>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_window.lock().unwrap() = Some(*window);
        match &self.behavior {
            Behavior::Items(items) => Ok(items.clone()),
            Behavior::Unreachable => Err(AggregatorError::unreachable(self.source, "connection refused")),
            Behavior::Panic => panic!("adapter blew up"),
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Vec::new())
            }
        }
    }
}
