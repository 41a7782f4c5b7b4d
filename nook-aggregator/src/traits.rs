use crate::types::{Item, Result, Source};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};

/// Trait for pulling content from one upstream source (Reddit, arXiv, feeds, ...)
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which partition family this adapter fills
    fn source(&self) -> Source;

    /// Human-readable name for logs
    fn name(&self) -> String {
        self.source().display_name().to_string()
    }

    /// Fetch the current items for this run.
    ///
    /// Returned items never carry a generated summary. A malformed record is
    /// skipped inside the adapter; only a source-wide failure is an error.
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Item>>;
}

/// Time span a run considers current for one source.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub run_date: NaiveDate,
    pub lookback: Duration,
    pub now: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(run_date: NaiveDate, lookback: Duration, now: DateTime<Utc>) -> Self {
        Self {
            run_date,
            lookback,
            now,
        }
    }

    /// Window anchored at the end of `run_date` (or now, whichever is earlier).
    pub fn for_run_date(run_date: NaiveDate, lookback: Duration) -> Self {
        let now = Utc::now();
        let end_of_day = run_date
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|dt| Local.from_local_datetime(&dt).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        Self::new(run_date, lookback, now.min(end_of_day))
    }

    /// Saturates at the Unix epoch for absurd lookbacks.
    pub fn start(&self) -> DateTime<Utc> {
        self.now
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Future timestamps (clock skew, scheduled posts) still count as current.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start()
    }

    /// Local calendar date the window opens on.
    pub fn start_date(&self) -> NaiveDate {
        self.start().with_timezone(&Local).date_naive().min(self.run_date)
    }
}
