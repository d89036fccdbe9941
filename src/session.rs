//! Authenticated session source
//!
//! Lecture-capture portals only hand out stream manifests to a logged-in
//! browser session, so the session cookie is borrowed from the user's
//! Firefox profile.

use crate::config::SessionConfig;
use crate::error::DatabaseError;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Source of a `Cookie` header for a domain
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Cookies that a browser would send to `domain`, formatted as a
    /// `Cookie` header value (`name=value; name=value`)
    ///
    /// An empty string means no cookies are stored for the domain.
    async fn cookies_for_domain(&self, domain: &str) -> Result<String>;

    /// Name of the implementation
    fn name(&self) -> &'static str;
}

/// Cookies read from a Firefox profile's `cookies.sqlite`
///
/// Each read works on a copy placed in a fresh, owner-only directory under
/// the scratch root (the system temp dir unless overridden), removed again
/// once the cookies are read.
pub struct FirefoxCookies {
    cookies_path: PathBuf,
    scratch_root: PathBuf,
}

impl FirefoxCookies {
    /// Read cookies from an explicit `cookies.sqlite`
    pub fn new(cookies_path: PathBuf) -> Self {
        Self {
            cookies_path,
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Place cookie copies under `dir` instead of the system temp dir
    pub fn with_scratch_root(mut self, dir: PathBuf) -> Self {
        self.scratch_root = dir;
        self
    }

    /// Use the configured path, or discover the default Firefox profile
    pub fn from_config(config: &SessionConfig) -> Option<Self> {
        match &config.cookies_path {
            Some(path) => Some(Self::new(path.clone())),
            None => Self::discover(),
        }
    }

    /// Find `cookies.sqlite` in the user's default Firefox profile
    pub fn discover() -> Option<Self> {
        let home = dirs::home_dir()?;
        [
            home.join(".mozilla/firefox"),
            home.join("Library/Application Support/Firefox/Profiles"),
        ]
        .iter()
        .find_map(|root| find_profile_cookies(root))
        .map(Self::new)
    }

    /// Path of the cookie database in use
    pub fn path(&self) -> &Path {
        &self.cookies_path
    }

    async fn read_cookies(&self, copy_dir: &Path) -> Result<Vec<(String, String, String)>> {
        // Firefox keeps the database locked and recent writes in the WAL, so
        // read a private copy of both.
        let copy = copy_dir.join("cookies.sqlite");
        tokio::fs::copy(&self.cookies_path, &copy).await.map_err(|e| {
            Error::Other(format!(
                "Failed to copy cookie database {}: {}",
                self.cookies_path.display(),
                e
            ))
        })?;
        let wal = wal_path(&self.cookies_path);
        if tokio::fs::try_exists(&wal).await? {
            tokio::fs::copy(&wal, wal_path(&copy)).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", copy.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse cookie database path: {}",
                    e
                )))
            })?;
        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to open cookie database: {}",
                e
            )))
        })?;

        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT host, name, value FROM moz_cookies ORDER BY id ASC",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read cookies: {}",
                e
            )))
        });

        pool.close().await;
        rows
    }
}

#[async_trait]
impl SessionSource for FirefoxCookies {
    async fn cookies_for_domain(&self, domain: &str) -> Result<String> {
        let copy_dir = tempfile::Builder::new()
            .prefix("video-archiver-cookies-")
            .tempdir_in(&self.scratch_root)?;

        let result = self.read_cookies(copy_dir.path()).await;
        let copy_path = copy_dir.path().to_path_buf();
        if let Err(e) = copy_dir.close() {
            tracing::warn!(dir = ?copy_path, error = %e, "failed to remove cookie copy");
        }

        let header = result?
            .into_iter()
            .filter(|(host, _, _)| host_matches(host, domain))
            .map(|(_, name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");

        tracing::debug!(
            domain = %domain,
            found = !header.is_empty(),
            "read session cookies"
        );
        Ok(header)
    }

    fn name(&self) -> &'static str {
        "firefox"
    }
}

/// Session source for machines without a browser profile
///
/// Always answers with no cookies, so authenticated portals see an
/// anonymous client.
pub struct NoSession;

#[async_trait]
impl SessionSource for NoSession {
    async fn cookies_for_domain(&self, _domain: &str) -> Result<String> {
        Ok(String::new())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Whether a cookie stored for `host` is sent to `domain`
///
/// `host` is the cookie's domain attribute as Firefox stores it: a leading
/// dot marks a cookie shared with subdomains.
fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_start_matches('.').to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    domain == host || domain.ends_with(&format!(".{}", host))
}

fn wal_path(db: &Path) -> PathBuf {
    let mut name = db.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}

/// Pick the profile under `root` that holds cookies
///
/// Prefers `*.default-release` (the profile Firefox creates for normal use),
/// then any `*.default*`, then the first profile alphabetically.
fn find_profile_cookies(root: &Path) -> Option<PathBuf> {
    let mut profiles: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join("cookies.sqlite").is_file())
        .collect();
    profiles.sort();

    let name_contains = |path: &PathBuf, needle: &str| {
        path.file_name()
            .map(|n| n.to_string_lossy().contains(needle))
            .unwrap_or(false)
    };

    profiles
        .iter()
        .find(|p| name_contains(p, "default-release"))
        .or_else(|| profiles.iter().find(|p| name_contains(p, "default")))
        .or_else(|| profiles.first())
        .map(|profile| profile.join("cookies.sqlite"))
}
