pub mod types;
pub mod traits;
pub mod utils;
pub mod fetcher;
pub mod parser;
pub mod generation;
pub mod normalizer;
pub mod store;
pub mod sources;
pub mod config;
pub mod orchestrator;

pub use types::*;
pub use traits::{FetchWindow, SourceAdapter};
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use generation::{
    ChatCompletionsBackend, Generated, GenerationBackend, GenerationClient, GenerationConfig,
    GenerationError, GenerationRequest, MockGenerationBackend, RetryPolicy,
};
pub use normalizer::{MergeOutcome, UndatedPolicy};
pub use store::{DatePartitionStore, PartitionDocument, PartitionGuard};
pub use config::{check_lookback_hours, AppConfig, MAX_LOOKBACK_HOURS};
pub use orchestrator::{
    LaneSettings, LaneState, LaneStatus, RunOrchestrator, RunReport, RunRequest, RunResult, RunStatus,
};
