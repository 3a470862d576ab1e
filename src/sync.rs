//! Incremental metadata synchronization.
//!
//! A partition is `Empty` until its first record lands, `Syncing` while a run
//! is in flight, and `Idle` otherwise. From `Empty` the whole night range
//! `[0, today + buffer)` is fetched in `chunk_nights` slices; from `Idle` only
//! the span between the newest stored cursor and now is fetched, in
//! `chunk_days` windows. Chunks run concurrently. A failed chunk is logged
//! and reported, never retried, and never stops its siblings.
//!
//! Re-running a sync over data already stored inserts nothing: rows are keyed
//! by their canonical record id and duplicates are counted as conflicts.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, SyncOptions};
use crate::fetch::TableSource;
use crate::metadata::{InsertReport, MetaQuery, MetadataStore, Partition, StoreError};
use crate::time::{Clock, NightCursor, jd_to_datetime};

/// Where a partition stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing stored yet.
    Empty,
    /// A sync run is in progress.
    Syncing,
    /// Records stored and no run in progress.
    Idle,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::Syncing => "syncing",
            Self::Idle => "idle",
        })
    }
}

/// Errors that abort a whole sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store could not be read.
    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),

    /// Sync options are out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another run on the same partition has not finished.
    #[error("partition {0} is already syncing")]
    AlreadySyncing(Partition),

    /// An explicit night range is empty or reversed.
    #[error("invalid night range {start}..{end}")]
    InvalidRange {
        /// First night.
        start: NightCursor,
        /// End night (exclusive).
        end: NightCursor,
    },
}

/// One bounded slice of a sync run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncChunk {
    /// Nights `start <= nid < end`.
    Nights {
        /// First night.
        start: NightCursor,
        /// End night (exclusive).
        end: NightCursor,
    },
    /// Cursor values in `[start, end]`.
    Window {
        /// Window start.
        start: DateTime<Utc>,
        /// Window end.
        end: DateTime<Utc>,
    },
}

impl SyncChunk {
    /// Metadata query covering this chunk.
    #[must_use]
    pub fn query(&self, partition: Partition) -> MetaQuery {
        match *self {
            Self::Nights { start, end } => MetaQuery::night_range(partition, start, end),
            Self::Window { start, end } => MetaQuery::time_range(partition, start, end),
        }
    }
}

impl fmt::Display for SyncChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nights { start, end } => write!(f, "nights {start}..{end}"),
            Self::Window { start, end } => {
                write!(f, "{} .. {}", start.to_rfc3339(), end.to_rfc3339())
            }
        }
    }
}

/// A chunk that could not be fetched or stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedChunk {
    /// The chunk.
    pub chunk: SyncChunk,
    /// Error text.
    pub error: String,
}

/// Accounting for one sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Partition synchronized.
    pub partition: Partition,
    /// Chunks planned.
    pub chunks: usize,
    /// Chunks that failed, in plan order.
    pub failed_chunks: Vec<FailedChunk>,
    /// New rows stored.
    pub inserted: u64,
    /// Rows skipped as already stored.
    pub conflicts: u64,
}

impl SyncReport {
    fn new(partition: Partition, chunks: usize) -> Self {
        Self {
            partition,
            chunks,
            failed_chunks: Vec::new(),
            inserted: 0,
            conflicts: 0,
        }
    }

    /// Every chunk succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }

    fn merge(&mut self, insert: InsertReport) {
        self.inserted += insert.inserted;
        self.conflicts += insert.conflicts;
    }
}

/// Keeps a partition's store in step with the archive.
#[derive(Clone)]
pub struct MetadataSync {
    source: Arc<dyn TableSource>,
    store: MetadataStore,
    clock: Arc<dyn Clock>,
    options: SyncOptions,
    active: Arc<Mutex<HashSet<Partition>>>,
}

impl fmt::Debug for MetadataSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataSync")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Clears the `Syncing` mark when a run ends, including on early return.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<Partition>>>,
    partition: Partition,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.partition);
    }
}

impl MetadataSync {
    /// Creates a synchronizer.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `options` are out of range.
    pub fn new(
        source: Arc<dyn TableSource>,
        store: MetadataStore,
        clock: Arc<dyn Clock>,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        options.validate()?;
        Ok(Self {
            source,
            store,
            clock,
            options,
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Store this synchronizer writes to.
    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Current state of `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the record count cannot be read.
    pub async fn state(&self, partition: Partition) -> Result<SyncState, SyncError> {
        if self.is_active(partition) {
            return Ok(SyncState::Syncing);
        }
        if self.store.count(partition).await? == 0 {
            Ok(SyncState::Empty)
        } else {
            Ok(SyncState::Idle)
        }
    }

    /// Brings `partition` up to date.
    ///
    /// An empty partition, or one whose records carry no cursor, is rebuilt
    /// from night zero; otherwise only the span since the newest cursor is
    /// fetched.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadySyncing`] if a run is in flight and
    /// [`SyncError::Store`] if the store cannot be read. Chunk failures are
    /// reported in the returned [`SyncReport`].
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn sync(&self, partition: Partition) -> Result<SyncReport, SyncError> {
        let _guard = self.begin(partition)?;

        let now = self.clock.now();
        let chunks = match self.store.latest_cursor(partition).await? {
            Some(last_jd) => match jd_to_datetime(last_jd) {
                Some(last) => {
                    info!(since = %last.to_rfc3339(), "catching up from newest record");
                    catch_up_chunks(last, now, self.options.chunk_days)
                }
                None => {
                    warn!(cursor = last_jd, "stored cursor out of range, rebuilding");
                    self.rebuild_chunks(now)
                }
            },
            None => {
                info!("no stored cursor, rebuilding");
                self.rebuild_chunks(now)
            }
        };
        Ok(self.run(partition, chunks).await)
    }

    /// Re-fetches every night from zero regardless of what is stored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadySyncing`] if a run is in flight.
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn rebuild(&self, partition: Partition) -> Result<SyncReport, SyncError> {
        let _guard = self.begin(partition)?;
        let chunks = self.rebuild_chunks(self.clock.now());
        Ok(self.run(partition, chunks).await)
    }

    /// Fetches nights `start <= nid < end`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRange`] for an empty range and
    /// [`SyncError::AlreadySyncing`] if a run is in flight.
    #[instrument(skip(self), fields(partition = %partition, start = %start, end = %end))]
    pub async fn sync_nights(
        &self,
        partition: Partition,
        start: NightCursor,
        end: NightCursor,
    ) -> Result<SyncReport, SyncError> {
        if start >= end {
            return Err(SyncError::InvalidRange { start, end });
        }
        let _guard = self.begin(partition)?;
        let chunks = night_chunks(start, end, self.options.chunk_nights);
        Ok(self.run(partition, chunks).await)
    }

    fn rebuild_chunks(&self, now: DateTime<Utc>) -> Vec<SyncChunk> {
        let end = NightCursor::new(
            NightCursor::at(now).value() + i64::from(self.options.night_buffer),
        );
        night_chunks(NightCursor::new(0), end, self.options.chunk_nights)
    }

    fn is_active(&self, partition: Partition) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&partition)
    }

    fn begin(&self, partition: Partition) -> Result<ActiveGuard, SyncError> {
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition);
        if !inserted {
            return Err(SyncError::AlreadySyncing(partition));
        }
        Ok(ActiveGuard {
            active: Arc::clone(&self.active),
            partition,
        })
    }

    async fn run(&self, partition: Partition, chunks: Vec<SyncChunk>) -> SyncReport {
        let mut report = SyncReport::new(partition, chunks.len());
        info!(chunks = chunks.len(), "sync started");

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers));
        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::new();
        let mut failures: Vec<Option<String>> = vec![None; chunks.len()];

        for (index, chunk) in chunks.iter().copied().enumerate() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                failures[index] = Some("worker pool closed".to_string());
                continue;
            };
            let source = Arc::clone(&self.source);
            let store = self.store.clone();

            let handle = tasks.spawn(async move {
                let _permit = permit;
                run_chunk(source.as_ref(), &store, partition, chunk).await
            });
            task_index.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join_error) => {
                    warn!(error = %join_error, "sync task panicked");
                    let id = join_error.id();
                    (id, Err(format!("sync task failed: {join_error}")))
                }
            };
            let Some(&index) = task_index.get(&id) else {
                continue;
            };
            match result {
                Ok(inserted) => report.merge(inserted),
                Err(error) => failures[index] = Some(error),
            }
        }

        report.failed_chunks = chunks
            .into_iter()
            .zip(failures)
            .filter_map(|(chunk, error)| error.map(|error| FailedChunk { chunk, error }))
            .collect();

        info!(
            chunks = report.chunks,
            failed = report.failed_chunks.len(),
            inserted = report.inserted,
            conflicts = report.conflicts,
            "sync finished"
        );
        report
    }
}

async fn run_chunk(
    source: &dyn TableSource,
    store: &MetadataStore,
    partition: Partition,
    chunk: SyncChunk,
) -> Result<InsertReport, String> {
    let query = chunk.query(partition);
    let records = match source.fetch_table(&query).await {
        Ok(records) => records,
        Err(error) => {
            warn!(chunk = %chunk, error = %error, "chunk fetch failed");
            return Err(error.to_string());
        }
    };
    if records.is_empty() {
        debug!(chunk = %chunk, "chunk returned no rows");
        return Ok(InsertReport::default());
    }
    match store.insert_many(partition, &records).await {
        Ok(report) => {
            debug!(
                chunk = %chunk,
                inserted = report.inserted,
                conflicts = report.conflicts,
                "chunk stored"
            );
            Ok(report)
        }
        Err(error) => {
            warn!(chunk = %chunk, error = %error, "chunk insert failed");
            Err(error.to_string())
        }
    }
}

/// Splits `[start, end)` into consecutive night slices of at most `size`.
#[must_use]
pub fn night_chunks(start: NightCursor, end: NightCursor, size: u32) -> Vec<SyncChunk> {
    let step = i64::from(size.max(1));
    let mut chunks = Vec::new();
    let mut lo = start.value();
    while lo < end.value() {
        let hi = (lo + step).min(end.value());
        chunks.push(SyncChunk::Nights {
            start: NightCursor::new(lo),
            end: NightCursor::new(hi),
        });
        lo = hi;
    }
    chunks
}

/// Splits `[last, now]` into windows of at most `days`, the last one ending at
/// `now`.
#[must_use]
pub fn catch_up_chunks(last: DateTime<Utc>, now: DateTime<Utc>, days: u32) -> Vec<SyncChunk> {
    let step = Duration::days(i64::from(days.max(1)));
    let mut chunks = Vec::new();
    let mut lo = last;
    while lo < now {
        let hi = (lo + step).min(now);
        chunks.push(SyncChunk::Window { start: lo, end: hi });
        lo = hi;
    }
    chunks
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::db::Database;
    use crate::fetch::FetchError;
    use crate::metadata::{MetadataRecord, Predicate};
    use crate::time::{FixedClock, datetime_to_jd};

    /// Serves canned rows keyed by the first night or window start of each
    /// query; queries whose night range starts at `fail_from` fail.
    #[derive(Default)]
    struct FakeTable {
        rows: Vec<MetadataRecord>,
        fail_from: Option<i64>,
        queries: StdMutex<Vec<MetaQuery>>,
    }

    #[async_trait]
    impl TableSource for FakeTable {
        async fn fetch_table(&self, query: &MetaQuery) -> Result<Vec<MetadataRecord>, FetchError> {
            self.queries.lock().unwrap().push(query.clone());
            if let (Some(fail), Some(Predicate::And(parts))) = (self.fail_from, query.predicate())
                && let Some(Predicate::Ge(_, lit)) = parts.first()
                && lit.to_string() == fail.to_string()
            {
                return Err(FetchError::status("https://irsa.example/search", 503));
            }
            Ok(self.rows.clone())
        }
    }

    fn sci_row(pid: i64, obsjd: f64) -> MetadataRecord {
        MetadataRecord::new()
            .with("pid", pid)
            .with("obsjd", obsjd)
            .with("field", 612_i64)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 1, 20, 12, 0, 0).unwrap()
    }

    async fn syncer(source: Arc<FakeTable>, options: SyncOptions) -> MetadataSync {
        let store = MetadataStore::new(Database::new_in_memory().await.unwrap());
        MetadataSync::new(source, store, Arc::new(FixedClock(now())), options).unwrap()
    }

    #[test]
    fn test_night_chunks_cover_range_without_overlap() {
        let chunks = night_chunks(NightCursor::new(0), NightCursor::new(21), 7);
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[2],
            SyncChunk::Nights {
                start: NightCursor::new(14),
                end: NightCursor::new(21)
            }
        );
        let ragged = night_chunks(NightCursor::new(0), NightCursor::new(10), 7);
        assert_eq!(
            ragged[1],
            SyncChunk::Nights {
                start: NightCursor::new(7),
                end: NightCursor::new(10)
            }
        );
    }

    #[test]
    fn test_catch_up_last_window_ends_at_now() {
        let last = now() - Duration::days(10);
        let chunks = catch_up_chunks(last, now(), 7);
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1],
            SyncChunk::Window {
                start: last + Duration::days(7),
                end: now()
            }
        );
        assert!(catch_up_chunks(now(), now(), 7).is_empty());
    }

    #[tokio::test]
    async fn test_empty_partition_rebuilds_from_night_zero() {
        let source = Arc::new(FakeTable::default());
        let sync = syncer(source.clone(), SyncOptions::default()).await;
        assert_eq!(sync.state(Partition::Science).await.unwrap(), SyncState::Empty);

        let report = sync.sync(Partition::Science).await.unwrap();

        // 2017-01-20 is night 19; plus a buffer of 2 gives [0, 21).
        assert_eq!(report.chunks, 3);
        assert!(report.is_complete());
        assert_eq!(report.inserted, 0);
        let urls: Vec<String> = source
            .queries
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.to_url("https://m"))
            .collect();
        assert!(urls.iter().any(|u| u.contains("WHERE=nid>=0+AND+nid<7")), "{urls:?}");
        assert!(urls.iter().any(|u| u.contains("WHERE=nid>=14+AND+nid<21")), "{urls:?}");
        assert_eq!(sync.state(Partition::Science).await.unwrap(), SyncState::Empty);
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let source = Arc::new(FakeTable {
            rows: vec![
                sci_row(1, NightCursor::new(3).start_jd() + 0.2),
                sci_row(2, NightCursor::new(4).start_jd()),
            ],
            ..FakeTable::default()
        });
        let sync = syncer(source, SyncOptions::default()).await;

        let first = sync.rebuild(Partition::Science).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(sync.state(Partition::Science).await.unwrap(), SyncState::Idle);

        let second = sync.rebuild(Partition::Science).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(sync.store().count(Partition::Science).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_idle_partition_catches_up_from_newest_cursor() {
        let last = now() - Duration::days(3);
        let source = Arc::new(FakeTable {
            rows: vec![sci_row(9, datetime_to_jd(last))],
            ..FakeTable::default()
        });
        let sync = syncer(source.clone(), SyncOptions::default()).await;
        sync.sync_nights(Partition::Science, NightCursor::new(0), NightCursor::new(1))
            .await
            .unwrap();
        source.queries.lock().unwrap().clear();

        let report = sync.sync(Partition::Science).await.unwrap();

        assert_eq!(report.chunks, 1);
        let queries = source.queries.lock().unwrap();
        assert!(matches!(queries[0].predicate(), Some(Predicate::Between(field, _, _)) if field == "obsjd"));
    }

    #[tokio::test]
    async fn test_failed_chunk_is_recorded_and_siblings_kept() {
        let source = Arc::new(FakeTable {
            rows: vec![sci_row(1, NightCursor::new(1).start_jd())],
            fail_from: Some(7),
            ..FakeTable::default()
        });
        let sync = syncer(source, SyncOptions::default()).await;

        let report = sync
            .sync_nights(Partition::Science, NightCursor::new(0), NightCursor::new(21))
            .await
            .unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.failed_chunks.len(), 1);
        assert_eq!(
            report.failed_chunks[0].chunk,
            SyncChunk::Nights {
                start: NightCursor::new(7),
                end: NightCursor::new(14)
            }
        );
        assert_eq!(report.inserted, 1);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_reversed_night_range_is_rejected() {
        let sync = syncer(Arc::new(FakeTable::default()), SyncOptions::default()).await;
        let err = sync
            .sync_nights(Partition::Raw, NightCursor::new(5), NightCursor::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let store = MetadataStore::new(Database::new_in_memory().await.unwrap());
        let options = SyncOptions {
            max_workers: 0,
            ..SyncOptions::default()
        };
        let err = MetadataSync::new(
            Arc::new(FakeTable::default()),
            store,
            Arc::new(FixedClock(now())),
            options,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_concurrent_run_on_same_partition_is_refused() {
        let sync = syncer(Arc::new(FakeTable::default()), SyncOptions::default()).await;
        let guard = sync.begin(Partition::Science).unwrap();
        assert_eq!(sync.state(Partition::Science).await.unwrap(), SyncState::Syncing);
        assert!(matches!(
            sync.sync(Partition::Science).await.unwrap_err(),
            SyncError::AlreadySyncing(Partition::Science)
        ));
        drop(guard);
        assert_eq!(sync.state(Partition::Science).await.unwrap(), SyncState::Empty);
    }
}
