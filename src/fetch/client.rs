//! Authenticated archive client.
//!
//! A [`Fetcher`] wraps one `reqwest::Client` (carrying the session cookie
//! jar) and exposes the two archive operations: reading a metadata table and
//! streaming a data file to disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::cookie::Jar;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::error::FetchError;
use super::table::parse_table;
use crate::config::ArchiveConfig;
use crate::metadata::{MetaQuery, MetadataRecord};

/// User-Agent sent with every archive request.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("irsa-sync/{version} (archive-mirror)")
}

/// Builds the shared HTTP client, optionally with a cookie jar.
///
/// # Errors
///
/// Returns [`FetchError::Client`] if the TLS backend or proxy settings cannot
/// be initialized.
pub fn build_http_client(
    config: &ArchiveConfig,
    cookie_jar: Option<Arc<Jar>>,
) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs()))
        .timeout(Duration::from_secs(config.read_timeout_secs()))
        .gzip(true)
        .user_agent(default_user_agent());
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    builder.build().map_err(FetchError::Client)
}

/// Source of metadata tables.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Runs one metadata query, returning rows in response order.
    async fn fetch_table(&self, query: &MetaQuery) -> Result<Vec<MetadataRecord>, FetchError>;
}

/// Source of data files.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Streams `url` into `dest`, returning the number of bytes written.
    ///
    /// On error the partially written file is left in place.
    async fn fetch_file(&self, url: &str, dest: &Path, chunk_size: usize)
    -> Result<u64, FetchError>;
}

/// Archive client over one authenticated HTTP client.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    meta_url: String,
}

impl Fetcher {
    /// Creates a fetcher that sends metadata queries to `config.meta_url()`.
    #[must_use]
    pub fn new(config: &ArchiveConfig, client: Client) -> Self {
        Self {
            client,
            meta_url: config.meta_url().to_string(),
        }
    }

    /// Underlying HTTP client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(url, status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl TableSource for Fetcher {
    #[instrument(skip(self), fields(query = %query))]
    async fn fetch_table(&self, query: &MetaQuery) -> Result<Vec<MetadataRecord>, FetchError> {
        let url = query.to_url(&self.meta_url);
        let response = self.get(&url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(&url, e))?;

        let records = parse_table(&body).map_err(|message| FetchError::table(&url, message))?;
        debug!(rows = records.len(), "metadata table received");
        Ok(records)
    }
}

#[async_trait]
impl FileSource for Fetcher {
    #[instrument(skip(self, dest), fields(url = %url, dest = %dest.display()))]
    async fn fetch_file(
        &self,
        url: &str,
        dest: &Path,
        chunk_size: usize,
    ) -> Result<u64, FetchError> {
        let response = self.get(url).await?;

        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(parent, e))?;
        }
        let file = File::create(dest)
            .await
            .map_err(|e| FetchError::io(dest, e))?;

        let bytes = stream_to_file(file, response, url, dest, chunk_size).await?;
        debug!(bytes, "file written");
        Ok(bytes)
    }
}

/// Streams the response body through a `chunk_size` write buffer.
async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
    chunk_size: usize,
) -> Result<u64, FetchError> {
    let mut writer = BufWriter::with_capacity(chunk_size.max(1), file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::transport(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| FetchError::io(path, e))?;

    Ok(bytes_written)
}
