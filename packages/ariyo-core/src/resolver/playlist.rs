//! Playlist container resolution (PLS/M3U).
//!
//! `.pls` and `.m3u` URLs are fetched and unwrapped to the stream they point
//! at, following chains recursively. HLS manifests (`.m3u8`) are playable
//! as-is and pass through untouched.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::ResolveError;
use crate::protocol_constants::{PLAYLIST_FETCH_TIMEOUT_SECS, USER_AGENT};
use crate::utils::url_extension;

/// Playlist type inferred from a URL's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Pls,
    M3u,
    Hls,
    NotPlaylist,
}

impl PlaylistKind {
    /// Classifies a URL by its path extension (query and fragment ignored).
    #[must_use]
    pub fn of(url: &str) -> Self {
        match url_extension(url).as_deref() {
            Some("pls") => Self::Pls,
            Some("m3u") => Self::M3u,
            Some("m3u8") => Self::Hls,
            _ => Self::NotPlaylist,
        }
    }

    /// Whether this URL must be fetched and unwrapped before playback.
    #[must_use]
    pub fn needs_unwrap(self) -> bool {
        matches!(self, Self::Pls | Self::M3u)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Pls => "PLS",
            Self::M3u => "M3U",
            Self::Hls => "HLS",
            Self::NotPlaylist => "stream",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetching
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches playlist bodies for the resolver.
#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    /// Returns the body of the playlist at `url`.
    async fn fetch(&self, url: &str) -> Result<String, ResolveError>;
}

/// Builds the HTTP client used for playlist fetches.
pub fn playlist_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(PLAYLIST_FETCH_TIMEOUT_SECS))
        .build()
}

/// reqwest-backed [`PlaylistFetcher`].
#[derive(Clone)]
pub struct HttpPlaylistFetcher {
    client: reqwest::Client,
}

impl HttpPlaylistFetcher {
    /// Wraps a shared client. See [`playlist_http_client`].
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlaylistFetcher for HttpPlaylistFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ResolveError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::HttpStatus(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Makes `entry` absolute against the playlist's own URL.
#[must_use]
pub fn make_absolute_url(entry: &str, playlist_url: &str) -> Option<String> {
    if let Ok(url) = Url::parse(entry) {
        return Some(url.to_string());
    }
    Url::parse(playlist_url)
        .ok()?
        .join(entry)
        .ok()
        .map(|u| u.to_string())
}

/// First `FileN=` entry of a PLS body. Keys are case-insensitive.
#[must_use]
pub fn parse_pls(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        let key = key.trim().to_ascii_lowercase();
        let index = key.strip_prefix("file")?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// First non-comment entry of an M3U body, made absolute against `playlist_url`.
#[must_use]
pub fn parse_m3u(content: &str, playlist_url: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .and_then(|entry| make_absolute_url(entry, playlist_url))
}

/// Resolves a playlist URL to its final stream URL.
///
/// Non-playlist and HLS URLs are returned unchanged without fetching.
pub async fn resolve_playlist(
    fetcher: &dyn PlaylistFetcher,
    url: &str,
    max_depth: usize,
) -> Result<String, ResolveError> {
    let mut current = url.to_string();
    for _ in 0..max_depth {
        let kind = PlaylistKind::of(&current);
        if !kind.needs_unwrap() {
            return Ok(current);
        }
        let body = fetcher.fetch(&current).await?;
        let next = match kind {
            PlaylistKind::Pls => parse_pls(&body).and_then(|e| make_absolute_url(&e, &current)),
            _ => parse_m3u(&body, &current),
        };
        current = next.ok_or(ResolveError::EmptyPlaylist(kind.label()))?;
    }
    if PlaylistKind::of(&current).needs_unwrap() {
        return Err(ResolveError::TooDeep);
    }
    Ok(current)
}
