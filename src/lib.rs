//! IRSA Sync Core Library
//!
//! This library keeps a local mirror of a survey archive's metadata and
//! downloads the data products that metadata describes.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`metadata`] - Records, partitions, remote queries and the local store
//! - [`sync`] - Incremental metadata synchronization
//! - [`resolve`] - Record to data-URL resolution per product type
//! - [`fetch`] - HTTP client for metadata tables and data files
//! - [`download`] - Concurrent batch downloads
//! - [`integrity`] - FITS header checks on downloaded files
//! - [`archive`] - Facade combining query, resolve, download and verify
//! - [`auth`] - Credentials and cookie-based login
//! - [`config`] - Endpoints, options and the TOML config file
//! - [`db`] - Database connection and schema management
//! - [`time`] - Night index and Julian date helpers

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod auth;
pub mod config;
pub mod db;
pub mod download;
pub mod fetch;
pub mod integrity;
pub mod metadata;
pub mod product;
pub mod resolve;
pub mod sync;
pub mod time;

// Re-export commonly used types
pub use archive::{Archive, ArchiveError, BatchReport, DownloadSource, ResolvedUrls};
pub use auth::{AuthError, Credentials, Session};
pub use config::{
    ArchiveConfig, ConfigError, DownloadOptions, FileConfig, LoadedConfig, SyncOptions,
    load_default_file_config, load_file_config,
};
pub use db::{Database, DbError};
pub use download::{ConcurrentDownloader, DownloadError, DownloadOutcome, DownloadSummary};
pub use fetch::{FetchError, FileSource, Fetcher, TableSource};
pub use integrity::{IntegrityError, IntegrityReport, verify};
pub use metadata::{
    Condition, FieldValue, InsertReport, MetaQuery, MetadataRecord, MetadataStore, Partition,
    RecordId, StoreError, StoreQuery, TimeWindow,
};
pub use product::{ProductKind, UnknownProduct};
pub use resolve::{ResolveError, UrlResolver, resolve};
pub use sync::{MetadataSync, SyncError, SyncReport, SyncState};
pub use time::{Clock, FixedClock, NightCursor, SystemClock};
