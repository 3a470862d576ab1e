//! Archive credentials and cookie-based login.
//!
//! The archive authenticates with a single GET against its login endpoint;
//! the session cookies it sets are kept in a shared jar that every later
//! request carries.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use reqwest::cookie::{CookieStore, Jar};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::ArchiveConfig;
use crate::fetch::{FetchError, build_http_client};

/// Environment variable holding the archive username.
pub const USERNAME_ENV: &str = "IRSA_USERNAME";

/// Environment variable holding the archive password.
pub const PASSWORD_ENV: &str = "IRSA_PASSWORD";

/// Errors raised while obtaining a session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable credentials were found.
    #[error(
        "no archive credentials: {0}\n  Suggestion: Set IRSA_USERNAME and IRSA_PASSWORD or pass --credentials <file>"
    )]
    MissingCredentials(String),

    /// The credentials file could not be read.
    #[error("failed to read credentials file {path}: {source}")]
    CredentialsFile {
        /// File path.
        path: std::path::PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The login request failed at the transport level.
    #[error("login request failed: {0}")]
    Transport(#[source] FetchError),

    /// The login endpoint answered with a non-2xx status.
    #[error("login rejected with HTTP {status}")]
    Rejected {
        /// Response status code.
        status: u16,
    },

    /// The login endpoint answered but set no session cookie.
    #[error("login did not establish a session (no cookie set for {host})")]
    NoSessionCookie {
        /// Host the cookie was expected for.
        host: String,
    },

    /// The configured login URL is not a valid URL.
    #[error("invalid login URL: {0}")]
    InvalidLoginUrl(String),
}

/// Archive username and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Wraps a username/password pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Reads `IRSA_USERNAME` / `IRSA_PASSWORD`, if both are set and non-empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).ok().filter(|v| !v.is_empty())?;
        let password = std::env::var(PASSWORD_ENV).ok().filter(|v| !v.is_empty())?;
        Some(Self::new(username, password))
    }

    /// Reads a two-line file: username, then password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialsFile`] if the file cannot be read and
    /// [`AuthError::MissingCredentials`] if either line is absent.
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AuthError::CredentialsFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).ok_or_else(|| {
            AuthError::MissingCredentials(format!(
                "{} must contain a username line and a password line",
                path.display()
            ))
        })
    }

    /// Environment variables first, then `file` if given.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] when neither source yields
    /// credentials, or a file error.
    pub fn resolve(file: Option<&Path>) -> Result<Self, AuthError> {
        if let Some(credentials) = Self::from_env() {
            return Ok(credentials);
        }
        match file {
            Some(path) => Self::from_file(path),
            None => Err(AuthError::MissingCredentials(format!(
                "{USERNAME_ENV}/{PASSWORD_ENV} are not set and no credentials file was given"
            ))),
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let mut lines = raw.lines().map(str::trim).filter(|line| !line.is_empty());
        let username = lines.next()?;
        let password = lines.next()?;
        Some(Self::new(username, password))
    }
}

/// An HTTP client carrying the archive session cookies.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    jar: Arc<Jar>,
    authenticated: bool,
}

impl Session {
    /// Logs in and keeps the resulting cookies.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] for a non-2xx answer,
    /// [`AuthError::NoSessionCookie`] when no cookie was set, and
    /// [`AuthError::Transport`] for network failures.
    #[instrument(skip(config, credentials), fields(user = %credentials.username, login_url = %config.login_url()))]
    pub async fn login(config: &ArchiveConfig, credentials: &Credentials) -> Result<Self, AuthError> {
        let jar = Arc::new(Jar::default());
        let client = build_http_client(config, Some(Arc::clone(&jar))).map_err(AuthError::Transport)?;

        let mut login_url = Url::parse(config.login_url())
            .map_err(|_| AuthError::InvalidLoginUrl(config.login_url().to_string()))?;
        login_url
            .query_pairs_mut()
            .append_pair("josso_cmd", "login")
            .append_pair("josso_username", &credentials.username)
            .append_pair("josso_password", &credentials.password);

        // The request URL carries the password, so transport errors are reported without it.
        let response = client
            .get(login_url.clone())
            .send()
            .await
            .map_err(|e| AuthError::Transport(FetchError::transport(config.login_url(), e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "login rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        if jar.cookies(&login_url).is_none() {
            return Err(AuthError::NoSessionCookie {
                host: login_url.host_str().unwrap_or_default().to_string(),
            });
        }

        info!("archive session established");
        Ok(Self {
            client,
            jar,
            authenticated: true,
        })
    }

    /// A session without login, for public data.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the HTTP client cannot be built.
    pub fn anonymous(config: &ArchiveConfig) -> Result<Self, AuthError> {
        let jar = Arc::new(Jar::default());
        let client = build_http_client(config, Some(Arc::clone(&jar))).map_err(AuthError::Transport)?;
        Ok(Self {
            client,
            jar,
            authenticated: false,
        })
    }

    /// HTTP client carrying the session cookies.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Shared cookie jar.
    #[must_use]
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    /// Whether this session went through [`login`](Self::login).
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}
