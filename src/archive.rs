//! High-level archive operations: query the local store, resolve data URLs,
//! download, and verify.
//!
//! [`Archive`] wires the pieces together so callers only deal with records
//! and product tags. A download batch always returns a full [`BatchReport`];
//! records that cannot be resolved and files that fail to fetch or verify are
//! reported there rather than aborting the batch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::ProgressBar;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::auth::Session;
use crate::config::{ArchiveConfig, ConfigError, DownloadOptions, SyncOptions};
use crate::download::{ConcurrentDownloader, DownloadError, DownloadOutcome, DownloadSummary};
use crate::fetch::{FetchError, FileSource, Fetcher, TableSource};
use crate::integrity;
use crate::metadata::{
    MetaQuery, MetadataRecord, MetadataStore, Partition, RecordId, StoreError, StoreQuery,
    TimeWindow,
};
use crate::product::ProductKind;
use crate::resolve::{ResolveError, UrlResolver};
use crate::sync::{MetadataSync, SyncError};
use crate::time::{Clock, SystemClock};

/// Errors that stop a whole archive operation.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The local store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote archive failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The batch could not be started.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Options are out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Records a download batch is drawn from.
#[derive(Debug, Clone)]
pub enum DownloadSource {
    /// Records matching a store query in the product's partition.
    Query(StoreQuery),
    /// An explicit record set.
    Records(Vec<MetadataRecord>),
}

/// URLs derived from a record set.
#[derive(Debug, Default)]
pub struct ResolvedUrls {
    /// Record id and URL, in record order.
    pub urls: Vec<(RecordId, String)>,
    /// Records that could not be resolved.
    pub unresolved: Vec<(RecordId, ResolveError)>,
}

impl ResolvedUrls {
    /// URLs only.
    #[must_use]
    pub fn url_list(&self) -> Vec<String> {
        self.urls.iter().map(|(_, url)| url.clone()).collect()
    }
}

/// Accounting for one download batch.
#[derive(Debug)]
pub struct BatchReport {
    /// Product downloaded.
    pub product: ProductKind,
    /// Records selected.
    pub requested: usize,
    /// Records whose URL could not be derived.
    pub unresolved: Vec<(RecordId, ResolveError)>,
    /// One outcome per distinct URL.
    pub outcomes: Vec<(String, DownloadOutcome)>,
}

impl BatchReport {
    /// Counts over [`outcomes`](Self::outcomes).
    #[must_use]
    pub fn summary(&self) -> DownloadSummary {
        DownloadSummary::from_outcomes(&self.outcomes)
    }

    /// Paths downloaded or already present that passed checking.
    #[must_use]
    pub fn success_set(&self) -> BTreeSet<PathBuf> {
        crate::download::success_set(&self.outcomes)
    }

    /// Every selected record resolved and every distinct URL ended with a
    /// usable file. Records that share a URL count once.
    #[must_use]
    pub fn is_fully_successful(&self) -> bool {
        self.unresolved.is_empty() && self.outcomes.iter().all(|(_, outcome)| outcome.is_usable())
    }
}

/// Archive facade over one store and one HTTP session.
#[derive(Clone)]
pub struct Archive {
    store: MetadataStore,
    tables: Arc<dyn TableSource>,
    downloader: ConcurrentDownloader,
    resolver: UrlResolver,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Builds an archive client that talks to `config`'s endpoints through
    /// `session`.
    #[must_use]
    pub fn new(config: &ArchiveConfig, store: MetadataStore, session: &Session) -> Self {
        let fetcher = Arc::new(Fetcher::new(config, session.client().clone()));
        Self::from_parts(
            config,
            store,
            fetcher.clone(),
            fetcher,
            Arc::new(SystemClock),
        )
    }

    /// Builds an archive client over explicit sources.
    #[must_use]
    pub fn from_parts(
        config: &ArchiveConfig,
        store: MetadataStore,
        tables: Arc<dyn TableSource>,
        files: Arc<dyn FileSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            tables,
            downloader: ConcurrentDownloader::new(files),
            resolver: UrlResolver::new(config),
            clock,
        }
    }

    /// Reports download progress on `bar`.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.downloader = self.downloader.with_progress(bar);
        self
    }

    /// Local metadata store.
    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// A synchronizer feeding this archive's store.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `options` are out of range.
    pub fn syncer(&self, options: SyncOptions) -> Result<MetadataSync, SyncError> {
        MetadataSync::new(
            Arc::clone(&self.tables),
            self.store.clone(),
            Arc::clone(&self.clock),
            options,
        )
    }

    /// Stored records matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Store`] if the query fails.
    pub async fn query(
        &self,
        partition: Partition,
        query: &StoreQuery,
    ) -> Result<Vec<MetadataRecord>, ArchiveError> {
        Ok(self.store.query(partition, query).await?)
    }

    /// Cone search against the remote metadata service. Nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Fetch`] if the request fails.
    #[instrument(skip(self, window), fields(partition = %partition))]
    pub async fn position(
        &self,
        partition: Partition,
        ra: f64,
        dec: f64,
        window: &TimeWindow,
    ) -> Result<Vec<MetadataRecord>, ArchiveError> {
        let query = MetaQuery::position(partition, ra, dec, window, self.clock.now());
        let records = self.tables.fetch_table(&query).await?;
        info!(rows = records.len(), "position query complete");
        Ok(records)
    }

    /// Data URLs of `product` for every record in `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Store`] if a [`DownloadSource::Query`] fails.
    pub async fn urls(
        &self,
        product: ProductKind,
        source: DownloadSource,
    ) -> Result<ResolvedUrls, ArchiveError> {
        let records = self.select(product, source).await?;
        Ok(self.resolve_all(&records, product))
    }

    /// Downloads `product` for every record in `source` into `dest_dir`.
    ///
    /// With `options.check` set, FITS files are probed after the batch and
    /// those that fail are reported as [`DownloadOutcome::IntegrityFailed`].
    /// They stay on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Config`] for invalid options and
    /// [`ArchiveError::Store`] if a [`DownloadSource::Query`] fails.
    #[instrument(skip(self, source, options), fields(product = %product, dest = %dest_dir.display()))]
    pub async fn download(
        &self,
        product: ProductKind,
        source: DownloadSource,
        dest_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<BatchReport, ArchiveError> {
        options.validate()?;
        let records = self.select(product, source).await?;
        let resolved = self.resolve_all(&records, product);
        let urls = resolved.url_list();

        let mut outcomes = self.downloader.download_all(&urls, dest_dir, options).await?;
        if options.check && !options.dry_run {
            outcomes = check_outcomes(outcomes).await;
        }

        let report = BatchReport {
            product,
            requested: records.len(),
            unresolved: resolved.unresolved,
            outcomes,
        };
        info!(
            requested = report.requested,
            unresolved = report.unresolved.len(),
            usable = report.success_set().len(),
            "batch complete"
        );
        Ok(report)
    }

    async fn select(
        &self,
        product: ProductKind,
        source: DownloadSource,
    ) -> Result<Vec<MetadataRecord>, ArchiveError> {
        match source {
            DownloadSource::Query(query) => {
                Ok(self.store.query(product.partition(), &query).await?)
            }
            DownloadSource::Records(records) => Ok(records),
        }
    }

    fn resolve_all(&self, records: &[MetadataRecord], product: ProductKind) -> ResolvedUrls {
        let mut resolved = ResolvedUrls::default();
        for record in records {
            match self.resolver.resolve(record, product) {
                Ok(url) => resolved.urls.push((record.id(), url)),
                Err(error) => {
                    warn!(record = %record.id(), error = %error, "cannot resolve record");
                    resolved.unresolved.push((record.id(), error));
                }
            }
        }
        resolved
    }
}

/// Replaces usable outcomes whose file fails its probe.
async fn check_outcomes(
    outcomes: Vec<(String, DownloadOutcome)>,
) -> Vec<(String, DownloadOutcome)> {
    let paths: Vec<PathBuf> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_usable())
        .filter_map(|(_, outcome)| outcome.path().map(Path::to_path_buf))
        .collect();
    if paths.is_empty() {
        return outcomes;
    }

    let report = match tokio::task::spawn_blocking(move || integrity::verify(paths)).await {
        Ok(report) => report,
        Err(join_error) => {
            warn!(error = %join_error, "integrity check task failed");
            return outcomes
                .into_iter()
                .map(|(url, outcome)| {
                    let usable = outcome
                        .path()
                        .filter(|_| outcome.is_usable())
                        .map(Path::to_path_buf);
                    match usable {
                        Some(path) => (
                            url,
                            DownloadOutcome::IntegrityFailed {
                                path,
                                reason: format!("integrity check did not run: {join_error}"),
                            },
                        ),
                        None => (url, outcome),
                    }
                })
                .collect();
        }
    };

    let mut failures: std::collections::HashMap<PathBuf, String> = report
        .failures
        .into_iter()
        .map(|(path, error)| (path, error.to_string()))
        .collect();

    outcomes
        .into_iter()
        .map(|(url, outcome)| {
            let failed = outcome
                .path()
                .filter(|_| outcome.is_usable())
                .and_then(|path| failures.remove_entry(path));
            match failed {
                Some((path, reason)) => (url, DownloadOutcome::IntegrityFailed { path, reason }),
                None => (url, outcome),
            }
        })
        .collect()
}
