//! Bounded-concurrency batch downloader.
//!
//! Each URL becomes one Tokio task in a `JoinSet`; a semaphore permit is
//! acquired before a task is spawned, so at most `max_workers` fetches are in
//! flight. A failed or panicked task is recorded as that URL's outcome and
//! never cancels its siblings.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use irsa_sync_core::{ArchiveConfig, ConcurrentDownloader, DownloadOptions, Fetcher, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ArchiveConfig::default();
//! let session = Session::anonymous(&config)?;
//! let downloader = ConcurrentDownloader::new(Arc::new(Fetcher::new(&config, session.client().clone())));
//! let urls = vec!["https://irsa.ipac.caltech.edu/ibe/data/ztf/products/sci/x.fits".to_string()];
//! let outcomes = downloader
//!     .download_all(&urls, Path::new("./data"), &DownloadOptions::default())
//!     .await?;
//! for (url, outcome) in &outcomes {
//!     println!("{url}: {outcome}");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::filename::destination_for;
use super::outcome::{DownloadOutcome, DownloadSummary};
use crate::config::{DownloadOptions, MAX_WORKERS_LIMIT};
use crate::fetch::FileSource;

const PARTIAL_SUFFIX: &str = ".part";

/// Error type for batch-level download failures.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Invalid worker count.
    #[error("invalid worker count {value}: must be between 1 and {MAX_WORKERS_LIMIT}")]
    InvalidWorkers {
        /// The value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Fetches batches of URLs with bounded concurrency.
#[derive(Clone)]
pub struct ConcurrentDownloader {
    source: Arc<dyn FileSource>,
    progress: Option<ProgressBar>,
}

impl std::fmt::Debug for ConcurrentDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentDownloader")
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl ConcurrentDownloader {
    /// Creates a downloader over a file source.
    #[must_use]
    pub fn new(source: Arc<dyn FileSource>) -> Self {
        Self {
            source,
            progress: None,
        }
    }

    /// Advances `bar` once per finished URL.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Downloads every URL into `dest_dir`, returning one outcome per distinct
    /// URL in first-seen order.
    ///
    /// Individual failures never fail the batch.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidWorkers`] if `options.max_workers` is
    /// outside `1..=64`.
    #[instrument(skip(self, urls, options), fields(
        urls = urls.len(),
        dest = %dest_dir.display(),
        dry_run = options.dry_run,
        overwrite = options.overwrite,
        workers = options.max_workers,
    ))]
    pub async fn download_all(
        &self,
        urls: &[String],
        dest_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<Vec<(String, DownloadOutcome)>, DownloadError> {
        if !(1..=MAX_WORKERS_LIMIT).contains(&options.max_workers) {
            return Err(DownloadError::InvalidWorkers {
                value: options.max_workers,
            });
        }

        let urls = dedupe(urls);
        if let Some(bar) = &self.progress {
            bar.set_length(urls.len() as u64);
        }
        let mut outcomes: Vec<Option<DownloadOutcome>> = vec![None; urls.len()];

        let semaphore = Arc::new(Semaphore::new(options.max_workers));
        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::new();

        for (index, url) in urls.iter().enumerate() {
            let Some(dest) = destination_for(url, dest_dir) else {
                warn!(url = %url, "URL has no file name");
                outcomes[index] = Some(DownloadOutcome::TransportFailed {
                    error: format!("invalid URL: {url}"),
                });
                self.tick();
                continue;
            };

            if options.dry_run {
                info!(url = %url, path = %dest.display(), "dry run: would download");
                outcomes[index] = Some(DownloadOutcome::WouldDownload { path: dest });
                self.tick();
                continue;
            }

            if !options.overwrite && tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                debug!(url = %url, path = %dest.display(), "already present, skipping");
                outcomes[index] = Some(DownloadOutcome::AlreadyPresent { path: dest });
                self.tick();
                continue;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| DownloadError::SemaphoreClosed)?;
            let source = Arc::clone(&self.source);
            let url = url.clone();
            let chunk_size = options.chunk_size;
            let progress = self.progress.clone();

            let handle = tasks.spawn(async move {
                let _permit = permit;
                let outcome = fetch_one(source.as_ref(), &url, &dest, chunk_size).await;
                if let Some(bar) = progress {
                    bar.inc(1);
                }
                outcome
            });
            task_index.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(&index) = task_index.get(&id) {
                        outcomes[index] = Some(outcome);
                    }
                }
                Err(join_error) => {
                    warn!(error = %join_error, "download task panicked");
                    if let Some(&index) = task_index.get(&join_error.id()) {
                        outcomes[index] = Some(DownloadOutcome::TransportFailed {
                            error: format!("download task failed: {join_error}"),
                        });
                    }
                }
            }
        }

        let results: Vec<(String, DownloadOutcome)> = urls
            .into_iter()
            .zip(outcomes)
            .map(|(url, outcome)| {
                let outcome = outcome.unwrap_or_else(|| DownloadOutcome::TransportFailed {
                    error: "download task produced no result".to_string(),
                });
                (url, outcome)
            })
            .collect();

        let summary = DownloadSummary::from_outcomes(&results);
        info!(
            requested = summary.requested,
            downloaded = summary.downloaded,
            already_present = summary.already_present,
            failed = summary.transport_failed,
            would_download = summary.would_download,
            "download batch complete"
        );
        Ok(results)
    }

    fn tick(&self) {
        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
    }
}

async fn fetch_one(
    source: &dyn FileSource,
    url: &str,
    dest: &Path,
    chunk_size: usize,
) -> DownloadOutcome {
    let part = partial_path(dest);
    let fetched = source.fetch_file(url, &part, chunk_size).await;
    let result = match fetched {
        Ok(bytes) => tokio::fs::rename(&part, dest)
            .await
            .map(|()| bytes)
            .map_err(|error| format!("failed to move {} into place: {error}", part.display())),
        Err(error) => Err(error.to_string()),
    };

    match result {
        Ok(bytes) => {
            debug!(url = %url, bytes, "downloaded");
            DownloadOutcome::Downloaded {
                path: dest.to_path_buf(),
                bytes,
            }
        }
        Err(error) => {
            warn!(url = %url, error = %error, "download failed");
            remove_partial(&part).await;
            DownloadOutcome::TransportFailed { error }
        }
    }
}

/// Sibling path a fetch streams into before it is renamed over `dest`.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_partial(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!(path = %part.display(), "removed partial file"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            warn!(path = %part.display(), error = %error, "failed to remove partial file");
        }
    }
}

fn dedupe(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(urls.len());
    urls.iter()
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}
