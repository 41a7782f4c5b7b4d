use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::future::Future;

use crate::defs::Item;
use crate::defs::Source;

/// Read-only view over stored partitions, consumed by the HTTP query service.
///
/// Implementations never mutate what they serve. A missing partition is an
/// empty list, not an error.
pub trait ContentQuery: Send + Sync {
    /// Sources that have at least one stored partition.
    fn list_sources(&self) -> impl Future<Output = Result<BTreeSet<Source>>> + Send;

    fn get(&self, source: Source, date: NaiveDate) -> impl Future<Output = Result<Vec<Item>>> + Send;

    /// Stored dates for a source, oldest first.
    fn list_dates(&self, source: Source) -> impl Future<Output = Result<Vec<NaiveDate>>> + Send;

    fn latest_date(&self, source: Source) -> impl Future<Output = Result<Option<NaiveDate>>> + Send {
        async move { Ok(self.list_dates(source).await?.last().copied()) }
    }
}
