use crate::generation::Generated;
use crate::traits::FetchWindow;
use crate::types::{Item, ItemKey};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What to do with items the source reports without a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndatedPolicy {
    /// Keep them and file them under the run date
    #[default]
    Include,
    /// Drop them
    Exclude,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// The full partition after the merge, in stored order
    pub to_persist: Vec<Item>,
    /// Keys still lacking a generated summary
    pub to_summarize: Vec<ItemKey>,
    pub added: usize,
    /// Stored entries without a summary that were refreshed and queued again
    pub requeued: Vec<ItemKey>,
}

/// Merge freshly fetched items into a stored partition.
///
/// Stored entries keep their positions. A stored entry that already has a
/// summary is left untouched; one without a summary takes the incoming raw
/// fields and is queued again. Unknown keys are appended in incoming order.
pub fn merge(existing: Vec<Item>, incoming: Vec<Item>) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        to_persist: existing,
        ..Default::default()
    };

    let mut index: HashMap<ItemKey, usize> = outcome
        .to_persist
        .iter()
        .enumerate()
        .map(|(pos, item)| (item.key(), pos))
        .collect();
    let mut queued: HashSet<ItemKey> = HashSet::new();
    let mut seen_incoming: HashSet<ItemKey> = HashSet::new();

    for mut item in incoming {
        let key = item.key();
        if !seen_incoming.insert(key.clone()) {
            debug!("Dropping duplicate incoming item {}", key);
            continue;
        }

        match index.get(&key) {
            Some(&pos) => {
                let stored = &mut outcome.to_persist[pos];
                if stored.has_generated_summary() {
                    continue;
                }
                refresh_raw_fields(stored, item);
                if queued.insert(key.clone()) {
                    outcome.to_summarize.push(key.clone());
                    outcome.requeued.push(key);
                }
            }
            None => {
                item.generated_summary = None;
                index.insert(key.clone(), outcome.to_persist.len());
                outcome.to_persist.push(item);
                queued.insert(key.clone());
                outcome.to_summarize.push(key);
                outcome.added += 1;
            }
        }
    }

    outcome
}

fn refresh_raw_fields(stored: &mut Item, fresh: Item) {
    stored.title = fresh.title;
    stored.url = fresh.url;
    if fresh.published_at.is_some() {
        stored.published_at = fresh.published_at;
    }
    if fresh.raw_summary.is_some() {
        stored.raw_summary = fresh.raw_summary;
    }
    stored.metadata.extend(fresh.metadata);
}

/// Write generation results back by key.
///
/// Returns how many entries received a summary. A non-empty stored summary
/// is never replaced by an empty one.
pub fn apply_generated(to_persist: &mut [Item], results: Vec<(ItemKey, Generated)>) -> usize {
    let mut by_key: HashMap<ItemKey, Generated> = results.into_iter().collect();
    let mut applied = 0;

    for item in to_persist.iter_mut() {
        let Some(generated) = by_key.remove(&item.key()) else {
            continue;
        };
        if generated.text.trim().is_empty() {
            continue;
        }
        item.generated_summary = Some(generated.text);
        applied += 1;
    }

    applied
}

/// Local calendar date an item is filed under.
///
/// Dated items use their own local date clamped to the window's date range;
/// undated items use the run date, or `None` when the policy drops them.
pub fn partition_date(item: &Item, window: &FetchWindow, policy: UndatedPolicy) -> Option<NaiveDate> {
    match item.published_at {
        Some(ts) => {
            let local = ts.with_timezone(&Local).date_naive();
            Some(local.clamp(window.start_date(), window.run_date))
        }
        None => match policy {
            UndatedPolicy::Include => Some(window.run_date),
            UndatedPolicy::Exclude => None,
        },
    }
}

/// Split items into per-date groups, each in incoming order. Dates come out
/// ascending.
pub fn group_by_partition(
    items: Vec<Item>,
    window: &FetchWindow,
    policy: UndatedPolicy,
) -> Vec<(NaiveDate, Vec<Item>)> {
    let mut groups: Vec<(NaiveDate, Vec<Item>)> = Vec::new();
    for item in items {
        let Some(date) = partition_date(&item, window, policy) else {
            debug!("Dropping undated item {}", item.key());
            continue;
        };
        match groups.iter_mut().find(|(d, _)| *d == date) {
            Some((_, group)) => group.push(item),
            None => groups.push((date, vec![item])),
        }
    }
    groups.sort_by_key(|(date, _)| *date);
    groups
}
