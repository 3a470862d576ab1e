//! Per-URL download outcomes and batch accounting.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// What happened to one requested URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Dry run: the file would have been fetched to `path`.
    WouldDownload {
        /// Planned destination.
        path: PathBuf,
    },
    /// The file already existed and overwrite was off.
    AlreadyPresent {
        /// Existing file.
        path: PathBuf,
    },
    /// The file was fetched.
    Downloaded {
        /// Written file.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// The fetch failed; no file is left behind.
    TransportFailed {
        /// Error text.
        error: String,
    },
    /// The file is on disk but did not pass its integrity check.
    IntegrityFailed {
        /// File that failed.
        path: PathBuf,
        /// Why it failed.
        reason: String,
    },
}

impl DownloadOutcome {
    /// Local path, if the outcome has one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::WouldDownload { path }
            | Self::AlreadyPresent { path }
            | Self::Downloaded { path, .. }
            | Self::IntegrityFailed { path, .. } => Some(path),
            Self::TransportFailed { .. } => None,
        }
    }

    /// The file is on disk and counts towards the success set.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::AlreadyPresent { .. } | Self::Downloaded { .. })
    }

    /// Short label for logs and summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::WouldDownload { .. } => "would_download",
            Self::AlreadyPresent { .. } => "already_present",
            Self::Downloaded { .. } => "downloaded",
            Self::TransportFailed { .. } => "transport_failed",
            Self::IntegrityFailed { .. } => "integrity_failed",
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldDownload { path } => write!(f, "would download to {}", path.display()),
            Self::AlreadyPresent { path } => write!(f, "already present at {}", path.display()),
            Self::Downloaded { path, bytes } => {
                write!(f, "downloaded {bytes} bytes to {}", path.display())
            }
            Self::TransportFailed { error } => write!(f, "failed: {error}"),
            Self::IntegrityFailed { path, reason } => {
                write!(f, "integrity failed for {}: {reason}", path.display())
            }
        }
    }
}

/// Counts over one batch of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// URLs requested (after duplicate removal).
    pub requested: usize,
    /// Dry-run entries.
    pub would_download: usize,
    /// Files skipped because they existed.
    pub already_present: usize,
    /// Files fetched.
    pub downloaded: usize,
    /// Fetch failures.
    pub transport_failed: usize,
    /// Integrity failures.
    pub integrity_failed: usize,
}

impl DownloadSummary {
    /// Tallies a batch.
    #[must_use]
    pub fn from_outcomes(outcomes: &[(String, DownloadOutcome)]) -> Self {
        let mut summary = Self {
            requested: outcomes.len(),
            ..Self::default()
        };
        for (_, outcome) in outcomes {
            match outcome {
                DownloadOutcome::WouldDownload { .. } => summary.would_download += 1,
                DownloadOutcome::AlreadyPresent { .. } => summary.already_present += 1,
                DownloadOutcome::Downloaded { .. } => summary.downloaded += 1,
                DownloadOutcome::TransportFailed { .. } => summary.transport_failed += 1,
                DownloadOutcome::IntegrityFailed { .. } => summary.integrity_failed += 1,
            }
        }
        summary
    }

    /// Files that are on disk and passed checking.
    #[must_use]
    pub fn usable(&self) -> usize {
        self.already_present + self.downloaded
    }

    /// Every requested file is usable.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.usable() == self.requested
    }
}

/// Paths of usable files in a batch.
#[must_use]
pub fn success_set(outcomes: &[(String, DownloadOutcome)]) -> BTreeSet<PathBuf> {
    outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_usable())
        .filter_map(|(_, outcome)| outcome.path().map(Path::to_path_buf))
        .collect()
}
