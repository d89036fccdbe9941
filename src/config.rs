//! Configuration types for video-archiver

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Library layout: where finished files and the catalog database live
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the video library (default: platform video directory, else `~/Videos`)
    #[serde(default = "default_videos_dir")]
    pub videos_dir: PathBuf,

    /// Catalog database (default: `<videos_dir>/metadata.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Subdirectory of `videos_dir` for lecture-capture recordings (default: "mediasite")
    #[serde(default = "default_lecture_capture_subdir")]
    pub lecture_capture_subdir: String,

    /// Marker inserted before the extension of in-flight files (default: "part")
    ///
    /// `Channel/Title.mkv` is fetched as `Channel/Title.part.mkv`.
    #[serde(default = "default_temp_suffix")]
    pub temp_suffix: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            videos_dir: default_videos_dir(),
            database_path: None,
            lecture_capture_subdir: default_lecture_capture_subdir(),
            temp_suffix: default_temp_suffix(),
        }
    }
}

/// Optional behaviors
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Re-encode Zoom recordings during finalize instead of stream copy (default: false)
    #[serde(default)]
    pub enable_zoom_reencoding: bool,
}

/// External tool paths and download format selection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the mpv player (auto-detected if None)
    #[serde(default)]
    pub mpv_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Maximum video height requested from the generic extractor (default: 2160)
    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// Container format every file is forced into (default: "mkv")
    #[serde(default = "default_container")]
    pub container: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            mpv_path: None,
            search_path: true,
            max_height: default_max_height(),
            container: default_container(),
        }
    }
}

/// Feed sources: the feed reader's cache and remote fetching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedsConfig {
    /// Newsboat cache database (default: `<data_dir>/newsboat/cache.db`)
    #[serde(default = "default_newsboat_cache_path")]
    pub newsboat_cache_path: PathBuf,

    /// Fetch feeds over HTTP when the feed reader does not know them (default: true)
    #[serde(default = "default_true")]
    pub remote_fallback: bool,

    /// Timeout for HTTP requests in seconds (default: 30)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub http_timeout: Duration,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            newsboat_cache_path: default_newsboat_cache_path(),
            remote_fallback: true,
            http_timeout: default_http_timeout(),
        }
    }
}

/// Authenticated session source
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Firefox `cookies.sqlite` to read (default: discovered under `~/.mozilla/firefox`)
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,
}

/// Desktop notification settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Send desktop notifications (default: true); the log always receives them
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Main configuration for video-archiver
///
/// Every section and field is optional in the TOML file; missing values fall
/// back to their defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Library layout
    #[serde(default)]
    pub library: LibraryConfig,

    /// Optional behaviors
    #[serde(default)]
    pub features: FeaturesConfig,

    /// External tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Feed sources
    #[serde(default)]
    pub feeds: FeedsConfig,

    /// Authenticated session source
    #[serde(default)]
    pub session: SessionConfig,

    /// Desktop notifications
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// With `path == None` the default location is used. A missing file yields
    /// the defaults; a file that exists but does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    tracing::debug!("no config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?path, "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config {
                    message: format!("Failed to read {}: {}", path.display(), e),
                    key: None,
                });
            }
        };

        let config = Self::from_toml(&content).map_err(|e| match e {
            Error::Config { message, key } => Error::Config {
                message: format!("{}: {}", path.display(), message),
                key,
            },
            other => other,
        })?;
        tracing::debug!(path = ?path, "loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config {
            message: format!("Error decoding TOML: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        let suffix = &self.library.temp_suffix;
        if suffix.is_empty() || suffix.contains(['/', '\\', '.']) {
            return Err(Error::Config {
                message: format!("temp_suffix must be a plain non-empty word, got {:?}", suffix),
                key: Some("library.temp_suffix".to_string()),
            });
        }

        let subdir = &self.library.lecture_capture_subdir;
        if subdir.is_empty() || subdir.contains(['/', '\\']) || subdir == ".." {
            return Err(Error::Config {
                message: format!(
                    "lecture_capture_subdir must be a single directory name, got {:?}",
                    subdir
                ),
                key: Some("library.lecture_capture_subdir".to_string()),
            });
        }

        if self.tools.max_height == 0 {
            return Err(Error::Config {
                message: "max_height must be greater than zero".to_string(),
                key: Some("tools.max_height".to_string()),
            });
        }

        let container = &self.tools.container;
        if container.is_empty() || !container.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config {
                message: format!("container must be a file extension, got {:?}", container),
                key: Some("tools.container".to_string()),
            });
        }

        Ok(())
    }

    /// Catalog database path
    pub fn database_path(&self) -> PathBuf {
        self.library
            .database_path
            .clone()
            .unwrap_or_else(|| self.library.videos_dir.join("metadata.db"))
    }

    /// Library root for lecture-capture recordings
    pub fn lecture_capture_dir(&self) -> PathBuf {
        self.library
            .videos_dir
            .join(&self.library.lecture_capture_subdir)
    }
}

/// Default configuration file location (`<config_dir>/video-archiver/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("video-archiver").join("config.toml"))
}

fn default_videos_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("Videos"))
}

fn default_newsboat_cache_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsboat")
        .join("cache.db")
}

fn default_lecture_capture_subdir() -> String {
    "mediasite".to_string()
}

fn default_temp_suffix() -> String {
    "part".to_string()
}

fn default_max_height() -> u32 {
    2160
}

fn default_container() -> String {
    "mkv".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
