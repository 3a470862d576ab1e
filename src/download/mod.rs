//! Concurrent batch downloads of archive data files.
//!
//! The engine streams each URL to `dest_dir/<url basename>` with a bounded
//! number of workers and reports one [`DownloadOutcome`] per distinct URL.
//! Integrity checking happens one level up, in [`crate::archive`].

mod engine;
mod filename;
mod outcome;

pub use engine::{ConcurrentDownloader, DownloadError};
pub use filename::{destination_for, filename_from_url};
pub use outcome::{DownloadOutcome, DownloadSummary, success_set};
