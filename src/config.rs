//! Archive endpoints, operation options and the on-disk config file.
//!
//! Configuration is passed explicitly: an [`ArchiveConfig`] is built once and
//! handed to every component that talks to the archive. [`FileConfig`] holds
//! optional defaults read from TOML; command-line flags override it.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::db::DatabaseOptions;

/// Default metadata search endpoint.
pub const DEFAULT_META_URL: &str = "https://irsa.ipac.caltech.edu/ibe/search/ztf/products";

/// Default data file endpoint.
pub const DEFAULT_DATA_URL: &str = "https://irsa.ipac.caltech.edu/ibe/data/ztf/products";

/// Default login endpoint.
pub const DEFAULT_LOGIN_URL: &str = "https://irsa.ipac.caltech.edu/account/signon/login.do";

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default worker pool size for sync chunks and downloads.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Upper bound accepted for `max_workers`.
pub const MAX_WORKERS_LIMIT: usize = 64;

/// Default nights per chunk when rebuilding.
pub const DEFAULT_CHUNK_NIGHTS: u32 = 7;

/// Default days per chunk when catching up.
pub const DEFAULT_CHUNK_DAYS: u32 = 7;

/// Nights past today covered by a rebuild.
pub const DEFAULT_NIGHT_BUFFER: u32 = 2;

/// Default write buffer for downloads (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Errors raised while building or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    InvalidValue {
        /// Option name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Accepted range, for the message.
        expected: &'static str,
    },

    /// An endpoint is not an absolute http(s) URL.
    #[error("invalid config value for `{field}`: '{value}' is not an http(s) URL")]
    InvalidUrl {
        /// Option name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {message}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::InvalidValue {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Endpoints and HTTP settings for one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    meta_url: String,
    data_url: String,
    login_url: String,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            meta_url: DEFAULT_META_URL.to_string(),
            data_url: DEFAULT_DATA_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl ArchiveConfig {
    /// Config pointing every endpoint at `base` (`{base}/search`, `{base}/data`,
    /// `{base}/login`). Used against mock archives.
    #[must_use]
    pub fn for_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self::default()
            .with_meta_url(format!("{base}/search"))
            .with_data_url(format!("{base}/data"))
            .with_login_url(format!("{base}/login"))
    }

    /// Replaces the metadata search endpoint.
    #[must_use]
    pub fn with_meta_url(mut self, url: impl Into<String>) -> Self {
        self.meta_url = trim_url(url.into());
        self
    }

    /// Replaces the data endpoint.
    #[must_use]
    pub fn with_data_url(mut self, url: impl Into<String>) -> Self {
        self.data_url = trim_url(url.into());
        self
    }

    /// Replaces the login endpoint.
    #[must_use]
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    /// Replaces HTTP timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        self.connect_timeout_secs = connect_timeout_secs;
        self.read_timeout_secs = read_timeout_secs;
        self
    }

    /// Metadata search endpoint.
    #[must_use]
    pub fn meta_url(&self) -> &str {
        &self.meta_url
    }

    /// Data endpoint.
    #[must_use]
    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// Login endpoint.
    #[must_use]
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// HTTP connect timeout in seconds.
    #[must_use]
    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs
    }

    /// HTTP read timeout in seconds.
    #[must_use]
    pub fn read_timeout_secs(&self) -> u64 {
        self.read_timeout_secs
    }

    /// Checks endpoints and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] or [`ConfigError::InvalidValue`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("meta_url", &self.meta_url),
            ("data_url", &self.data_url),
            ("login_url", &self.login_url),
        ] {
            let scheme_ok = url::Url::parse(value)
                .is_ok_and(|u| matches!(u.scheme(), "http" | "https"));
            if !scheme_ok {
                return Err(ConfigError::InvalidUrl {
                    field,
                    value: value.clone(),
                });
            }
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Chunking and concurrency for metadata synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Nights per query when rebuilding from an empty store.
    pub chunk_nights: u32,
    /// Days per query when catching up from the last cursor.
    pub chunk_days: u32,
    /// Chunks in flight at once.
    pub max_workers: usize,
    /// Nights past today included in a rebuild.
    pub night_buffer: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk_nights: DEFAULT_CHUNK_NIGHTS,
            chunk_days: DEFAULT_CHUNK_DAYS,
            max_workers: DEFAULT_MAX_WORKERS,
            night_buffer: DEFAULT_NIGHT_BUFFER,
        }
    }
}

impl SyncOptions {
    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a zero chunk or an
    /// out-of-range worker count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3650).contains(&self.chunk_nights) {
            return Err(ConfigError::invalid("chunk_nights", self.chunk_nights, "1..=3650"));
        }
        if !(1..=3650).contains(&self.chunk_days) {
            return Err(ConfigError::invalid("chunk_days", self.chunk_days, "1..=3650"));
        }
        validate_workers(self.max_workers)
    }
}

/// Behaviour of one batch download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Re-fetch files that already exist.
    pub overwrite: bool,
    /// Report what would be fetched without touching the network or disk.
    pub dry_run: bool,
    /// Fetches in flight at once.
    pub max_workers: usize,
    /// Write buffer size in bytes.
    pub chunk_size: usize,
    /// Probe downloaded FITS files before counting them as successful.
    pub check: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            dry_run: false,
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            check: true,
        }
    }
}

impl DownloadOptions {
    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an out-of-range worker count
    /// or a zero chunk size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_workers(self.max_workers)?;
        if self.chunk_size == 0 {
            return Err(ConfigError::invalid("chunk_size", self.chunk_size, "1.."));
        }
        Ok(())
    }
}

fn validate_workers(value: usize) -> Result<(), ConfigError> {
    if !(1..=MAX_WORKERS_LIMIT).contains(&value) {
        return Err(ConfigError::invalid("max_workers", value, "1..=64"));
    }
    Ok(())
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(field, value, "1..=3600"));
    }
    Ok(())
}

/// TOML-backed defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Metadata search endpoint.
    pub meta_url: Option<String>,
    /// Data endpoint.
    pub data_url: Option<String>,
    /// Login endpoint.
    pub login_url: Option<String>,
    /// Local metadata database.
    pub database: Option<PathBuf>,
    /// Default download directory.
    pub download_dir: Option<PathBuf>,
    /// Two-line credentials file (username, password).
    pub credentials_file: Option<PathBuf>,
    /// Worker pool size (1..=64).
    pub max_workers: Option<usize>,
    /// Nights per rebuild chunk.
    pub chunk_nights: Option<u32>,
    /// Days per catch-up chunk.
    pub chunk_days: Option<u32>,
    /// Download write buffer in bytes.
    pub chunk_size: Option<usize>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Pooled connections to the metadata database (1..=32).
    pub db_max_connections: Option<u32>,
    /// `SQLite` busy timeout in milliseconds (0..=600000).
    pub db_busy_timeout_ms: Option<u32>,
}

impl FileConfig {
    /// Validates values against the same ranges as the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(workers) = self.max_workers {
            validate_workers(workers)?;
        }
        if let Some(secs) = self.connect_timeout_secs {
            validate_timeout_secs("connect_timeout_secs", secs)?;
        }
        if let Some(secs) = self.read_timeout_secs {
            validate_timeout_secs("read_timeout_secs", secs)?;
        }
        if self.chunk_size == Some(0) {
            return Err(ConfigError::invalid("chunk_size", 0, "1.."));
        }
        if let Some(nights) = self.chunk_nights.filter(|n| *n == 0) {
            return Err(ConfigError::invalid("chunk_nights", nights, "1..=3650"));
        }
        if let Some(days) = self.chunk_days.filter(|d| *d == 0) {
            return Err(ConfigError::invalid("chunk_days", days, "1..=3650"));
        }
        if let Some(count) = self.db_max_connections.filter(|c| !(1..=32).contains(c)) {
            return Err(ConfigError::invalid("db_max_connections", count, "1..=32"));
        }
        if let Some(ms) = self.db_busy_timeout_ms.filter(|ms| *ms > 600_000) {
            return Err(ConfigError::invalid("db_busy_timeout_ms", ms, "0..=600000"));
        }
        Ok(())
    }

    /// Database pool settings with this file's overrides applied.
    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        let defaults = DatabaseOptions::default();
        DatabaseOptions {
            max_connections: self.db_max_connections.unwrap_or(defaults.max_connections),
            busy_timeout_ms: self.db_busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
        }
    }

    /// Archive endpoints with this file's overrides applied to the defaults.
    #[must_use]
    pub fn archive_config(&self) -> ArchiveConfig {
        let mut config = ArchiveConfig::default();
        if let Some(url) = &self.meta_url {
            config = config.with_meta_url(url.clone());
        }
        if let Some(url) = &self.data_url {
            config = config.with_data_url(url.clone());
        }
        if let Some(url) = &self.login_url {
            config = config.with_login_url(url.clone());
        }
        config.with_timeouts(
            self.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            self.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS),
        )
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

impl LoadedConfig {
    /// Parsed config, or an empty one when no file was found.
    #[must_use]
    pub fn file_config(&self) -> FileConfig {
        self.config.clone().unwrap_or_default()
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/irsa-sync/config.toml`
/// 2. `$HOME/.config/irsa-sync/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("irsa-sync").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("irsa-sync")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file exists but cannot be read, parsed
/// or validated.
pub fn load_default_file_config() -> Result<LoadedConfig, ConfigError> {
    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(existing) if existing.exists() => {
            let config = load_file_config(existing)?;
            Ok(LoadedConfig {
                path,
                config: Some(config),
            })
        }
        _ => Ok(LoadedConfig { path, config: None }),
    }
}

/// Loads and validates one config file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`], [`ConfigError::Parse`] or a validation error.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: FileConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_archive_config_points_at_irsa() {
        let config = ArchiveConfig::default();
        assert_eq!(config.meta_url(), DEFAULT_META_URL);
        assert_eq!(config.data_url(), DEFAULT_DATA_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_config_strips_trailing_slash() {
        let config = ArchiveConfig::for_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.meta_url(), "http://127.0.0.1:9000/search");
        assert_eq!(config.data_url(), "http://127.0.0.1:9000/data");
        assert_eq!(config.login_url(), "http://127.0.0.1:9000/login");
    }

    #[test]
    fn test_archive_config_rejects_non_http_url() {
        let config = ArchiveConfig::default().with_data_url("ftp://example.org/data");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("data_url"));
    }

    #[test]
    fn test_worker_bounds() {
        let mut options = DownloadOptions::default();
        assert!(options.validate().is_ok());
        options.max_workers = 0;
        assert!(options.validate().is_err());
        options.max_workers = 65;
        assert!(options.validate().is_err());
        options.max_workers = 64;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_sync_options_reject_zero_chunks() {
        let options = SyncOptions {
            chunk_nights: 0,
            ..SyncOptions::default()
        };
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_nights"));
    }

    #[test]
    fn test_load_file_config_parses_and_applies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_url = \"http://mirror.local/data/\"\nmax_workers = 4\nchunk_days = 3\n",
        )
        .unwrap();

        let config = load_file_config(&path).unwrap();
        assert_eq!(config.max_workers, Some(4));
        assert_eq!(config.chunk_days, Some(3));
        let archive = config.archive_config();
        assert_eq!(archive.data_url(), "http://mirror.local/data");
        assert_eq!(archive.meta_url(), DEFAULT_META_URL);
    }

    #[test]
    fn test_database_options_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_max_connections = 2\ndb_busy_timeout_ms = 250\n").unwrap();

        let options = load_file_config(&path).unwrap().database_options();
        assert_eq!(options.max_connections, 2);
        assert_eq!(options.busy_timeout_ms, 250);
        assert_eq!(FileConfig::default().database_options(), DatabaseOptions::default());

        std::fs::write(&path, "db_max_connections = 0\n").unwrap();
        assert!(matches!(
            load_file_config(&path).unwrap_err(),
            ConfigError::InvalidValue { field: "db_max_connections", .. }
        ));
    }

    #[test]
    fn test_load_file_config_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = 4\n").unwrap();
        assert!(matches!(
            load_file_config(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn test_load_file_config_validates_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_workers = 100\n").unwrap();
        assert!(matches!(
            load_file_config(&path).unwrap_err(),
            ConfigError::InvalidValue { field: "max_workers", .. }
        ));
    }
}
