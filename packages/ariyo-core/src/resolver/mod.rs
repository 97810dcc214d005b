//! Source resolution: raw station/track URL to a fetchable URL.
//!
//! Pipeline, each stage optional:
//! 1. scheme normalization (protocol-relative, insecure upgrades)
//! 2. playlist unwrapping (`.pls`/`.m3u`; `.m3u8` passes through)
//! 3. cache-busting token on reloads, applied to the stream URL itself
//! 4. same-origin proxy rewrite for hosts needing CORS or mixed-content relief
//!
//! Resolution never fails. Recoverable problems degrade to the best URL
//! available and are recorded in [`ResolvedSource::fallback_reason`].

pub mod playlist;

use std::sync::Arc;

use url::{form_urlencoded, Url};

use crate::config::{matches_any, ResolverPolicy};
use crate::protocol_constants::MAX_PLAYLIST_DEPTH;
use crate::utils::now_millis;

pub use playlist::{
    make_absolute_url, parse_m3u, parse_pls, playlist_http_client, resolve_playlist,
    HttpPlaylistFetcher, PlaylistFetcher, PlaylistKind,
};

/// Output of [`SourceResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// URL to assign to the media element.
    pub url: String,
    /// Stream URL a playlist unwrapped to, if the input was a playlist.
    pub playlist_target: Option<String>,
    /// Whether the URL was rewritten through the proxy.
    pub proxied: bool,
    /// Why resolution fell back to a less preferred URL.
    pub fallback_reason: Option<String>,
}

/// Applies a [`ResolverPolicy`] to raw URLs.
#[derive(Clone)]
pub struct SourceResolver {
    policy: ResolverPolicy,
    fetcher: Arc<dyn PlaylistFetcher>,
}

impl SourceResolver {
    #[must_use]
    pub fn new(policy: ResolverPolicy, fetcher: Arc<dyn PlaylistFetcher>) -> Self {
        Self { policy, fetcher }
    }

    #[must_use]
    pub fn policy(&self) -> &ResolverPolicy {
        &self.policy
    }

    /// Runs the full pipeline. `reload` adds the cache-busting token.
    pub async fn resolve(&self, raw: &str, reload: bool) -> ResolvedSource {
        let normalized = self.normalize_scheme(raw);
        let mut fallback_reason = None;
        let mut playlist_target = None;

        let stream_url = if PlaylistKind::of(&normalized).needs_unwrap() {
            match resolve_playlist(self.fetcher.as_ref(), &normalized, MAX_PLAYLIST_DEPTH).await {
                Ok(target) => {
                    log::info!("[Resolver] Playlist {} -> {}", normalized, target);
                    let target = self.normalize_scheme(&target);
                    playlist_target = Some(target.clone());
                    target
                }
                Err(e) => {
                    log::warn!(
                        "[Resolver] Playlist resolution failed for {}: {}; using original URL",
                        normalized,
                        e
                    );
                    fallback_reason = Some(e.to_string());
                    normalized
                }
            }
        } else {
            normalized
        };

        let proxied = self.needs_proxy(&stream_url);
        let stream_url = if reload {
            self.cache_bust(&stream_url, now_millis())
        } else {
            stream_url
        };
        let url = if proxied {
            self.proxy_url(&stream_url)
        } else {
            stream_url
        };

        ResolvedSource {
            url,
            playlist_target,
            proxied,
            fallback_reason,
        }
    }

    /// Protocol-relative URLs become https; http URLs on upgrade hosts become https.
    #[must_use]
    pub fn normalize_scheme(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("//") {
            return format!("https://{rest}");
        }
        let Ok(mut url) = Url::parse(trimmed) else {
            return trimmed.to_string();
        };
        let upgrade = url.scheme() == "http"
            && url
                .host_str()
                .is_some_and(|h| matches_any(&self.policy.upgrade_insecure_hosts, h));
        if upgrade && url.set_scheme("https").is_ok() {
            return url.to_string();
        }
        trimmed.to_string()
    }

    /// Whether `url` must be routed through the same-origin proxy.
    #[must_use]
    pub fn needs_proxy(&self, url: &str) -> bool {
        if url.starts_with(&self.policy.proxy_base) {
            return false;
        }
        let Ok(parsed) = Url::parse(url) else {
            // Relative URLs are already same-origin
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        if matches_any(&self.policy.proxy_hosts, host) {
            return true;
        }
        self.policy.secure_context && self.policy.proxy_insecure && parsed.scheme() == "http"
    }

    /// `{proxy_base}?url=<percent-encoded url>`.
    #[must_use]
    pub fn proxy_url(&self, url: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(url.as_bytes()).collect();
        let separator = if self.policy.proxy_base.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}url={}", self.policy.proxy_base, separator, encoded)
    }

    /// Sets the cache-busting parameter to `token`, replacing any previous one.
    #[must_use]
    pub fn cache_bust(&self, url: &str, token: u64) -> String {
        let param = self.policy.cache_bust_param.as_str();
        let (without_fragment, fragment) = match url.split_once('#') {
            Some((head, frag)) => (head, Some(frag)),
            None => (url, None),
        };
        let (path, query) = match without_fragment.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (without_fragment, None),
        };

        let bust = format!("{param}={token}");
        let mut pairs: Vec<&str> = query
            .map(|q| {
                q.split('&')
                    .filter(|pair| {
                        !pair.is_empty() && pair.split('=').next() != Some(param)
                    })
                    .collect()
            })
            .unwrap_or_default();
        pairs.push(&bust);

        let mut out = format!("{}?{}", path, pairs.join("&"));
        if let Some(fragment) = fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostPattern;
    use crate::test_fixtures::StaticPlaylistFetcher;

    fn resolver(policy: ResolverPolicy, fetcher: StaticPlaylistFetcher) -> SourceResolver {
        SourceResolver::new(policy, Arc::new(fetcher))
    }

    fn policy() -> ResolverPolicy {
        ResolverPolicy {
            upgrade_insecure_hosts: vec![HostPattern::new("secure.example")],
            proxy_hosts: vec![HostPattern::new("*.cors-strict.example")],
            ..ResolverPolicy::default()
        }
    }

    #[test]
    fn protocol_relative_becomes_https() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        assert_eq!(
            r.normalize_scheme("//radio.example/live"),
            "https://radio.example/live"
        );
    }

    #[test]
    fn insecure_upgrade_only_for_listed_hosts() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        assert_eq!(
            r.normalize_scheme("http://cdn.secure.example/live"),
            "https://cdn.secure.example/live"
        );
        assert_eq!(
            r.normalize_scheme("http://other.example/live"),
            "http://other.example/live"
        );
    }

    #[test]
    fn proxy_decision_follows_policy() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        assert!(r.needs_proxy("https://a.cors-strict.example/s"));
        assert!(r.needs_proxy("http://plain.example/s"));
        assert!(!r.needs_proxy("https://plain.example/s"));
        assert!(!r.needs_proxy("/audio/local.mp3"));
        assert!(!r.needs_proxy("/api/radio/proxy?url=x"));

        let insecure_page = resolver(
            ResolverPolicy {
                secure_context: false,
                ..policy()
            },
            StaticPlaylistFetcher::new(),
        );
        assert!(!insecure_page.needs_proxy("http://plain.example/s"));
    }

    #[test]
    fn proxy_url_percent_encodes_target() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        assert_eq!(
            r.proxy_url("http://plain.example/s?a=1&b=2"),
            "/api/radio/proxy?url=http%3A%2F%2Fplain.example%2Fs%3Fa%3D1%26b%3D2"
        );
    }

    #[test]
    fn cache_bust_replaces_previous_token() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        assert_eq!(
            r.cache_bust("https://a.example/s", 1),
            "https://a.example/s?_cb=1"
        );
        assert_eq!(
            r.cache_bust("https://a.example/s?x=1&_cb=1#t", 2),
            "https://a.example/s?x=1&_cb=2#t"
        );
    }

    #[tokio::test]
    async fn first_load_has_no_cache_bust_and_reload_does() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        let first = r.resolve("https://a.example/live", false).await;
        assert_eq!(first.url, "https://a.example/live");
        assert!(!first.proxied);

        let reload = r.resolve("https://a.example/live", true).await;
        assert!(reload.url.starts_with("https://a.example/live?_cb="));
    }

    #[tokio::test]
    async fn playlist_target_is_proxied_when_insecure() {
        let fetcher = StaticPlaylistFetcher::new().with(
            "https://r.example/live.pls",
            "[playlist]\nFile1=http://upstream.example/stream.mp3\n",
        );
        let r = resolver(policy(), fetcher);
        let resolved = r.resolve("https://r.example/live.pls", false).await;

        assert_eq!(
            resolved.playlist_target.as_deref(),
            Some("http://upstream.example/stream.mp3")
        );
        assert!(resolved.proxied);
        assert_eq!(
            resolved.url,
            "/api/radio/proxy?url=http%3A%2F%2Fupstream.example%2Fstream.mp3"
        );
        assert!(resolved.fallback_reason.is_none());
    }

    #[tokio::test]
    async fn reload_busts_upstream_url_inside_proxy_rewrite() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        let resolved = r.resolve("http://upstream.example/stream.mp3", true).await;

        assert!(resolved.proxied);
        assert!(
            resolved
                .url
                .starts_with("/api/radio/proxy?url=http%3A%2F%2Fupstream.example%2Fstream.mp3%3F_cb%3D"),
            "{}",
            resolved.url
        );
        assert!(!resolved.url.contains("&_cb="));
    }

    #[tokio::test]
    async fn failed_playlist_falls_back_to_original_url() {
        let r = resolver(policy(), StaticPlaylistFetcher::new());
        let resolved = r.resolve("https://r.example/missing.m3u", false).await;

        assert_eq!(resolved.url, "https://r.example/missing.m3u");
        assert!(resolved.playlist_target.is_none());
        assert_eq!(resolved.fallback_reason.as_deref(), Some("Playlist HTTP 404"));
    }
}
