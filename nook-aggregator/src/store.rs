use crate::types::{AggregatorError, ContentQuery, Item, Result, Source};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// On-disk shape of one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDocument {
    pub source: Source,
    pub date: NaiveDate,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<Item>,
}

/// Exclusive access to one (source, date) partition, in-process and across
/// processes. Released on drop.
pub struct PartitionGuard {
    source: Source,
    date: NaiveDate,
    _local: OwnedMutexGuard<()>,
    file: File,
}

impl PartitionGuard {
    pub fn source(&self) -> Source {
        self.source
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Drop for PartitionGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release partition lock {}/{}: {}", self.source, self.date, e);
        }
    }
}

/// JSON documents laid out as `{root}/{source}/{YYYY-MM-DD}.json`.
///
/// Writes go through a temp file in the same directory and a rename, so a
/// reader sees either the previous document or the new one.
pub struct DatePartitionStore {
    root: PathBuf,
    locks: StdMutex<HashMap<(Source, NaiveDate), Arc<Mutex<()>>>>,
}

impl DatePartitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, source: Source, date: NaiveDate) -> PathBuf {
        self.source_dir(source)
            .join(format!("{}.json", date.format(DATE_FORMAT)))
    }

    fn source_dir(&self, source: Source) -> PathBuf {
        self.root.join(source.as_str())
    }

    fn lock_path(&self, source: Source, date: NaiveDate) -> PathBuf {
        self.source_dir(source)
            .join(format!("{}.json.lock", date.format(DATE_FORMAT)))
    }

    /// Take the partition lock. Hold the guard across read, merge and write.
    pub async fn lock(&self, source: Source, date: NaiveDate) -> Result<PartitionGuard> {
        let local = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| AggregatorError::General("partition lock table poisoned".to_string()))?;
            // Entries nobody holds or waits on are only referenced by the table
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry((source, date)).or_default().clone()
        };
        let local = local.lock_owned().await;

        let lock_path = self.lock_path(source, date);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            if let Some(parent) = lock_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| AggregatorError::General(format!("lock task failed: {}", e)))?
        .map_err(|e| AggregatorError::StoreWriteFailed {
            path: self.lock_path(source, date),
            reason: format!("cannot lock partition: {}", e),
        })?;

        debug!(source = %source, date = %date, "Partition locked");
        Ok(PartitionGuard {
            source,
            date,
            _local: local,
            file,
        })
    }

    /// Partitions with a live in-process lock entry.
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    /// Items of one partition; empty when it was never written.
    pub async fn read(&self, source: Source, date: NaiveDate) -> Result<Vec<Item>> {
        Ok(self
            .read_document(source, date)
            .await?
            .map(|doc| doc.items)
            .unwrap_or_default())
    }

    pub async fn read_document(&self, source: Source, date: NaiveDate) -> Result<Option<PartitionDocument>> {
        let path = self.partition_path(source, date);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AggregatorError::StoreReadFailed {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let document: PartitionDocument =
            serde_json::from_str(&content).map_err(|e| AggregatorError::StoreReadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(document))
    }

    /// Replace a partition with `items`.
    ///
    /// Callers hold the partition guard; the guard is taken by reference so
    /// the write cannot happen without it.
    pub async fn write(&self, guard: &PartitionGuard, items: Vec<Item>) -> Result<PathBuf> {
        let (source, date) = (guard.source(), guard.date());
        let path = self.partition_path(source, date);
        let document = PartitionDocument {
            source,
            date,
            updated_at: Utc::now(),
            items,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let count = document.items.len();

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| AggregatorError::General(format!("write task failed: {}", e)))?
            .map_err(|e| AggregatorError::StoreWriteFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        info!(source = %source, date = %date, items = count, "Partition written");
        Ok(path)
    }

    /// Remove temp files left behind by interrupted writes.
    ///
    /// Each partition's temp files are removed under its lock, so a write in
    /// flight keeps its temp file.
    pub async fn sweep_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        for source in Source::ALL {
            let (dated, stray) = self.temp_files(source).await?;
            for (date, paths) in dated {
                let _guard = self.lock(source, date).await?;
                removed += remove_files(paths).await?;
            }
            removed += remove_files(stray).await?;
        }

        if removed > 0 {
            info!("Removed {} stale temp files", removed);
        }
        Ok(removed)
    }

    /// Temp files of one source, grouped by the partition they were meant for.
    async fn temp_files(&self, source: Source) -> Result<(BTreeMap<NaiveDate, Vec<PathBuf>>, Vec<PathBuf>)> {
        let mut dated: BTreeMap<NaiveDate, Vec<PathBuf>> = BTreeMap::new();
        let mut stray = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.source_dir(source)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((dated, stray)),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.starts_with('.') && name.ends_with(".tmp")) {
                continue;
            }
            let date = name
                .get(1..11)
                .and_then(|stem| NaiveDate::parse_from_str(stem, DATE_FORMAT).ok());
            match date {
                Some(date) => dated.entry(date).or_default().push(entry.path()),
                None => stray.push(entry.path()),
            }
        }
        Ok((dated, stray))
    }

    pub async fn stored_dates(&self, source: Source) -> Result<Vec<NaiveDate>> {
        let dir = self.source_dir(source);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, DATE_FORMAT) {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub async fn stored_sources(&self) -> Result<BTreeSet<Source>> {
        let mut sources = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sources),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(source) = Source::from_str(&name) else {
                continue;
            };
            if !self.stored_dates(source).await?.is_empty() {
                sources.insert(source);
            }
        }
        Ok(sources)
    }
}

async fn remove_files(paths: Vec<PathBuf>) -> Result<usize> {
    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "partition path has no parent")
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let result = (|| {
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
        drop(tmp_file);
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Persist the rename itself
    #[cfg(unix)]
    {
        File::open(parent)?.sync_all()?;
    }

    Ok(())
}

impl ContentQuery for DatePartitionStore {
    async fn list_sources(&self) -> anyhow::Result<BTreeSet<Source>> {
        Ok(self.stored_sources().await?)
    }

    async fn get(&self, source: Source, date: NaiveDate) -> anyhow::Result<Vec<Item>> {
        Ok(self.read(source, date).await?)
    }

    async fn list_dates(&self, source: Source) -> anyhow::Result<Vec<NaiveDate>> {
        Ok(self.stored_dates(source).await?)
    }
}
