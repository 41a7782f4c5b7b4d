use crate::config::AppConfig;
use crate::fetcher::Fetcher;
use crate::generation::{Generated, GenerationClient};
use crate::normalizer::{self, UndatedPolicy};
use crate::store::DatePartitionStore;
use crate::traits::{FetchWindow, SourceAdapter};
use crate::types::{AggregatorError, Item, ItemKey, Result, Source};
use chrono::{Local, NaiveDate};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Step a lane is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneState {
    Idle,
    FetchingSource,
    Merging,
    Summarizing,
    Persisting,
    Done,
    Failed(String),
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneState::Idle => write!(f, "idle"),
            LaneState::FetchingSource => write!(f, "fetching"),
            LaneState::Merging => write!(f, "merging"),
            LaneState::Summarizing => write!(f, "summarizing"),
            LaneState::Persisting => write!(f, "persisting"),
            LaneState::Done => write!(f, "done"),
            LaneState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LaneStatus {
    Success,
    /// Everything was persisted but some summaries are still missing
    Partial,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub source: Source,
    pub fetched: usize,
    pub added: usize,
    /// Previously stored items whose summary succeeded this time
    pub resummarized: usize,
    pub summarized: usize,
    pub summarization_failures: usize,
    pub truncated_inputs: usize,
    pub partitions: Vec<NaiveDate>,
    pub status: LaneStatus,
    pub elapsed_ms: u64,
}

impl RunResult {
    fn new(source: Source) -> Self {
        Self {
            source,
            fetched: 0,
            added: 0,
            resummarized: 0,
            summarized: 0,
            summarization_failures: 0,
            truncated_inputs: 0,
            partitions: Vec::new(),
            status: LaneStatus::Success,
            elapsed_ms: 0,
        }
    }

    fn failed(source: Source, reason: impl Into<String>) -> Self {
        Self {
            status: LaneStatus::Failed {
                reason: reason.into(),
            },
            ..Self::new(source)
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, LaneStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub results: Vec<RunResult>,
    pub status: RunStatus,
}

impl RunReport {
    fn new(run_id: Uuid, run_date: NaiveDate, results: Vec<RunResult>) -> Self {
        let status = if results.iter().any(RunResult::is_failed) {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        Self {
            run_id,
            run_date,
            results,
            status,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Partial => 2,
        }
    }

    pub fn result_for(&self, source: Source) -> Option<&RunResult> {
        self.results.iter().find(|r| r.source == source)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Empty means every registered source
    pub sources: Vec<Source>,
    /// Defaults to today in local time
    pub run_date: Option<NaiveDate>,
    pub lookback_overrides: HashMap<Source, chrono::Duration>,
}

impl RunRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_sources(sources: Vec<Source>) -> Self {
        Self {
            sources,
            ..Self::default()
        }
    }

    pub fn on_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = Some(run_date);
        self
    }

    pub fn with_lookback(mut self, source: Source, lookback: chrono::Duration) -> Self {
        self.lookback_overrides.insert(source, lookback);
        self
    }
}

/// Per-source settings the orchestrator needs besides the adapter.
#[derive(Debug, Clone, Copy)]
pub struct LaneSettings {
    pub lookback: chrono::Duration,
    pub undated: UndatedPolicy,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            lookback: chrono::Duration::hours(24),
            undated: UndatedPolicy::Include,
        }
    }
}

struct Registration {
    adapter: Arc<dyn SourceAdapter>,
    settings: LaneSettings,
}

/// Runs one lane per source in parallel and collects a report.
pub struct RunOrchestrator {
    adapters: HashMap<Source, Registration>,
    store: Arc<DatePartitionStore>,
    generation: GenerationClient,
    lane_timeout: Duration,
}

impl RunOrchestrator {
    pub fn new(store: Arc<DatePartitionStore>, generation: GenerationClient) -> Self {
        Self {
            adapters: HashMap::new(),
            store,
            generation,
            lane_timeout: Duration::from_secs(300),
        }
    }

    /// Wire every enabled source from configuration.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<DatePartitionStore>,
        generation: GenerationClient,
    ) -> Result<Self> {
        let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
        let mut orchestrator = Self::new(store, generation)
            .with_lane_timeout(Duration::from_secs(config.fetch.lane_timeout_seconds));

        for source in config.enabled_sources() {
            let settings = LaneSettings {
                lookback: config.lookback(source),
                undated: config.undated_policy(source),
            };
            orchestrator.register(config.build_adapter(source, fetcher.clone()), settings);
        }
        Ok(orchestrator)
    }

    pub fn with_lane_timeout(mut self, lane_timeout: Duration) -> Self {
        self.lane_timeout = lane_timeout;
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>, settings: LaneSettings) {
        info!("Registering source adapter: {}", adapter.name());
        self.adapters
            .insert(adapter.source(), Registration { adapter, settings });
    }

    pub fn registered_sources(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|s| self.adapters.contains_key(s))
            .collect()
    }

    pub async fn run(&self, request: RunRequest) -> RunReport {
        let run_id = Uuid::new_v4();
        let run_date = request.run_date.unwrap_or_else(|| Local::now().date_naive());
        let sources = if request.sources.is_empty() {
            self.registered_sources()
        } else {
            let mut seen = HashSet::new();
            request.sources.iter().copied().filter(|s| seen.insert(*s)).collect()
        };

        info!(run_id = %run_id, run_date = %run_date, "Starting run for {} sources", sources.len());

        let mut results: HashMap<Source, RunResult> = HashMap::new();
        let mut lanes = JoinSet::new();

        for source in &sources {
            let Some(registration) = self.adapters.get(source) else {
                warn!(source = %source, "No adapter registered");
                results.insert(*source, RunResult::failed(*source, "source is not configured"));
                continue;
            };

            let lookback = request
                .lookback_overrides
                .get(source)
                .copied()
                .unwrap_or(registration.settings.lookback);
            let lane = Lane {
                source: *source,
                adapter: registration.adapter.clone(),
                store: self.store.clone(),
                generation: self.generation.clone(),
                window: FetchWindow::for_run_date(run_date, lookback),
                undated: registration.settings.undated,
                lane_timeout: self.lane_timeout,
                state: LaneState::Idle,
            };

            let source = *source;
            lanes.spawn(async move {
                let outcome = AssertUnwindSafe(lane.run()).catch_unwind().await;
                (source, outcome)
            });
        }

        while let Some(joined) = lanes.join_next().await {
            match joined {
                Ok((_, Ok(result))) => {
                    results.insert(result.source, result);
                }
                Ok((source, Err(_))) => {
                    error!(source = %source, "Lane panicked");
                    results.insert(source, RunResult::failed(source, "lane panicked"));
                }
                Err(e) => error!("Lane task did not complete: {}", e),
            }
        }

        let ordered: Vec<RunResult> = sources
            .iter()
            .map(|s| {
                results
                    .remove(s)
                    .unwrap_or_else(|| RunResult::failed(*s, "lane did not report"))
            })
            .collect();

        let report = RunReport::new(run_id, run_date, ordered);
        info!(run_id = %run_id, status = ?report.status, "Run finished");
        report
    }
}

/// One source's fetch, merge, summarize and persist sequence.
struct Lane {
    source: Source,
    adapter: Arc<dyn SourceAdapter>,
    store: Arc<DatePartitionStore>,
    generation: GenerationClient,
    window: FetchWindow,
    undated: UndatedPolicy,
    lane_timeout: Duration,
    state: LaneState,
}

impl Lane {
    fn transition(&mut self, next: LaneState) {
        debug!(source = %self.source, "{} -> {}", self.state, next);
        self.state = next;
    }

    async fn run(mut self) -> RunResult {
        let started = Instant::now();
        let mut result = RunResult::new(self.source);

        if let Err(e) = self.execute(&mut result).await {
            error!(source = %self.source, "Lane failed: {}", e);
            self.transition(LaneState::Failed(e.to_string()));
            result.status = LaneStatus::Failed {
                reason: e.to_string(),
            };
        } else {
            self.transition(LaneState::Done);
            if result.summarization_failures > 0 {
                result.status = LaneStatus::Partial;
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            source = %self.source,
            fetched = result.fetched,
            added = result.added,
            summarized = result.summarized,
            failures = result.summarization_failures,
            "Lane {}",
            self.state
        );
        result
    }

    async fn execute(&mut self, result: &mut RunResult) -> Result<()> {
        self.transition(LaneState::FetchingSource);
        let items = tokio::time::timeout(self.lane_timeout, self.adapter.fetch(&self.window))
            .await
            .map_err(|_| AggregatorError::Timeout {
                what: format!("fetching {}", self.source),
                seconds: self.lane_timeout.as_secs(),
            })??;
        result.fetched = items.len();
        info!(source = %self.source, "Fetched {} items", items.len());

        for (date, group) in normalizer::group_by_partition(items, &self.window, self.undated) {
            self.process_partition(date, group, result).await?;
        }
        Ok(())
    }

    async fn process_partition(&mut self, date: NaiveDate, incoming: Vec<Item>, result: &mut RunResult) -> Result<()> {
        self.transition(LaneState::Merging);
        let guard = self.store.lock(self.source, date).await?;
        let existing = self.store.read(self.source, date).await?;
        let mut outcome = normalizer::merge(existing, incoming);
        result.added += outcome.added;

        if outcome.to_summarize.is_empty() {
            debug!(source = %self.source, date = %date, "Partition unchanged");
            return Ok(());
        }

        self.transition(LaneState::Summarizing);
        let requeued: HashSet<ItemKey> = outcome.requeued.iter().cloned().collect();
        let generated = self.summarize(&outcome.to_persist, &outcome.to_summarize, result).await;
        result.resummarized += generated.iter().filter(|(key, _)| requeued.contains(key)).count();
        normalizer::apply_generated(&mut outcome.to_persist, generated);

        self.transition(LaneState::Persisting);
        self.store.write(&guard, outcome.to_persist).await?;
        result.partitions.push(date);
        Ok(())
    }

    /// Generate summaries for `keys`; failures are counted and left unset.
    async fn summarize(&self, items: &[Item], keys: &[ItemKey], result: &mut RunResult) -> Vec<(ItemKey, Generated)> {
        let wanted: HashSet<ItemKey> = keys.iter().cloned().collect();
        let pending: Vec<Item> = items.iter().filter(|i| wanted.contains(&i.key())).cloned().collect();
        let concurrency = self.generation.config().concurrency.max(1);
        let client = self.generation.clone();

        let outcomes: Vec<(ItemKey, Result<Generated>)> = stream::iter(pending)
            .map(move |item| {
                let generation = client.clone();
                async move {
                    let outcome = generation.generate_for_item(&item).await;
                    (item.key(), outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut generated = Vec::new();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(g) => {
                    if g.truncated {
                        result.truncated_inputs += 1;
                    }
                    result.summarized += 1;
                    generated.push((key, g));
                }
                Err(e) => {
                    warn!(source = %self.source, "Summary for {} unavailable: {}", key, e);
                    result.summarization_failures += 1;
                }
            }
        }
        generated
    }
}
