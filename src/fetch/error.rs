//! Error types for archive transport.
//!
//! Every variant carries the URL or path it concerns, so there are no
//! `From<reqwest::Error>` / `From<std::io::Error>` conversions; use the
//! constructor helpers instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while talking to the archive.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection refused, TLS, interrupted body).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// Non-2xx response other than an authentication failure.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The archive refused the session (401/403).
    #[error(
        "[AUTH] authentication required (HTTP {status}) fetching {url}\n  Suggestion: Set IRSA_USERNAME and IRSA_PASSWORD or pass --credentials"
    )]
    AuthRequired {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The metadata response body was not a readable table.
    #[error("malformed table from {url}: {message}")]
    Table {
        /// Requested URL.
        url: String,
        /// Parser message.
        message: String,
    },

    /// Local filesystem error while writing a file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// Destination path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a send/body error to `Timeout` or `Network`.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a status error, promoting 401/403 to `AuthRequired`.
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        if matches!(status, 401 | 403) {
            Self::AuthRequired {
                url: url.into(),
                status,
            }
        } else {
            Self::HttpStatus {
                url: url.into(),
                status,
            }
        }
    }

    /// Creates a table parsing error.
    pub fn table(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Table {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for authentication failures.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }
}
