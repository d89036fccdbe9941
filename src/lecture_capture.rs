//! Lecture-capture portal (Mediasite) client
//!
//! The portal's player page is a thin shell around a JSON player service.
//! Given the page URL, the service returns the presentation's metadata and
//! its stream manifests, but only for a request carrying the signed-in
//! browser session's cookies.
//!
//! Everything is derived from the page URL's origin: the service endpoint,
//! the cookie domain and the `Referer`/`Origin` headers the stream host
//! checks.

use crate::error::{FetchError, FinalizeError};
use crate::session::SessionSource;
use crate::types::Metadata;
use crate::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Player service path relative to the portal origin
const PLAYER_OPTIONS_PATH: &str = "/Mediasite/PlayerService/PlayerService.svc/json/GetPlayerOptions";

/// Mime type of the HLS manifest among a stream's video URLs
const MANIFEST_MIME_TYPE: &str = "audio/x-mpegurl";

/// Artist used when a presentation lists no presenter
pub const DEFAULT_ARTIST: &str = "Mediasite";

#[derive(Debug, Deserialize)]
struct PlayerOptionsResponse {
    d: PlayerOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlayerOptions {
    // null when the session is missing or expired
    presentation: Option<Presentation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Presentation {
    title: Option<String>,
    #[serde(default)]
    presenters: Option<Vec<Presenter>>,
    #[serde(default)]
    streams: Option<Vec<Stream>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Presenter {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Stream {
    #[serde(default)]
    video_urls: Option<Vec<VideoUrl>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VideoUrl {
    mime_type: Option<String>,
    location: Option<String>,
}

/// A resolved stream manifest and the headers its host requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamManifest {
    /// HLS manifest URL
    pub url: String,
    /// Raw HTTP headers, `\r\n`-separated, for the media tool
    pub headers: String,
}

/// Client for one portal's player service
pub struct LectureCaptureClient {
    http_client: reqwest::Client,
    session: Arc<dyn SessionSource>,
}

impl LectureCaptureClient {
    /// Create a client that authenticates with cookies from `session`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(session: Arc<dyn SessionSource>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            session,
        })
    }

    /// Title and presenter of the presentation behind `page_url`
    ///
    /// Returns `None` when the service does not describe the presentation,
    /// which is how it answers requests without a valid session.
    pub async fn metadata(&self, page_url: &str) -> Result<Option<Metadata>> {
        let Some(presentation) = self.presentation(page_url).await? else {
            return Ok(None);
        };

        let Some(title) = presentation.title.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        let artist = presentation
            .presenters
            .unwrap_or_default()
            .into_iter()
            .find_map(|p| p.name.filter(|n| !n.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_ARTIST.to_string());

        Ok(Some(Metadata::new(page_url, title, artist)))
    }

    /// First HLS manifest of the presentation behind `page_url`
    ///
    /// # Errors
    /// [`FinalizeError::NoStreamFound`] when the response has no presentation
    /// (usually an expired session) or the first stream has no manifest.
    pub async fn manifest(&self, page_url: &str) -> Result<StreamManifest> {
        let no_stream = || {
            Error::Finalize(FinalizeError::NoStreamFound {
                url: page_url.to_string(),
            })
        };

        let presentation = self.presentation(page_url).await?.ok_or_else(no_stream)?;

        let location = presentation
            .streams
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|stream| stream.video_urls)
            .unwrap_or_default()
            .into_iter()
            .find(|v| v.mime_type.as_deref() == Some(MANIFEST_MIME_TYPE))
            .and_then(|v| v.location)
            .ok_or_else(no_stream)?;

        let origin = origin_of(page_url)?;
        tracing::debug!(url = %page_url, manifest = %location, "found stream manifest");

        Ok(StreamManifest {
            url: location,
            headers: format!("Referer: {}/\r\nOrigin: {}", origin, origin),
        })
    }

    async fn presentation(&self, page_url: &str) -> Result<Option<Presentation>> {
        let resource_id = resource_id(page_url)?;
        let origin = origin_of(page_url)?;
        let domain = Url::parse(page_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| Error::unresolvable(page_url, "URL has no host"))?;

        let cookies = self.session.cookies_for_domain(&domain).await?;
        if cookies.is_empty() {
            tracing::warn!(domain = %domain, "no session cookies found for lecture-capture portal");
        }

        let body = serde_json::json!({
            "getPlayerOptionsRequest": {
                "QueryString": "",
                "ResourceId": resource_id,
                "UrlReferrer": null,
            }
        });

        let response = self
            .http_client
            .post(format!("{}{}", origin, PLAYER_OPTIONS_PATH))
            .header(reqwest::header::REFERER, page_url)
            .header(reqwest::header::ORIGIN, &origin)
            .header(reqwest::header::COOKIE, cookies)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(FetchError::PlayerService {
                url: page_url.to_string(),
                status: status.as_u16(),
            }));
        }

        let text = response.text().await?;
        let parsed: PlayerOptionsResponse = serde_json::from_str(&text)?;

        if parsed.d.presentation.is_none() {
            tracing::warn!(url = %page_url, "player service returned no presentation, session may have expired");
        }
        Ok(parsed.d.presentation)
    }
}

/// Resource id of a player page: its last non-empty path segment
pub fn resource_id(page_url: &str) -> Result<String> {
    let missing = || {
        Error::Fetch(FetchError::MissingResourceId {
            url: page_url.to_string(),
        })
    };

    let parsed = Url::parse(page_url).map_err(|_| missing())?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(missing)
}

fn origin_of(page_url: &str) -> Result<String> {
    let parsed = Url::parse(page_url)
        .map_err(|e| Error::unresolvable(page_url, format!("invalid URL: {}", e)))?;
    Ok(parsed.origin().ascii_serialization())
}
