//! Same-origin audio proxy: `GET|HEAD /api/radio/proxy?url=<upstream>`.
//!
//! Streams upstream audio back to the page so browsers see a same-origin,
//! HTTPS response for hosts that lack CORS headers or only serve plain HTTP.
//! Requests are screened against the host policy in [`ProxyConfig`] and
//! against private network targets before anything is fetched.

use std::net::{IpAddr, Ipv4Addr};

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use thiserror::Error;
use url::{Host, Url};

use crate::api::response::api_error;
use crate::api::ProxyState;
use crate::config::{matches_any, ProxyConfig};
use crate::error::{friendly_network_error, ErrorCode};
use crate::protocol_constants::MAX_PROXY_REDIRECTS;

const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";
const CACHE_LIVE: &str = "no-store";
const CACHE_FINITE: &str = "public, max-age=60";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Proxy request failures, each mapped to an HTTP status and JSON body.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Missing url")]
    MissingUrl,

    #[error("Invalid url")]
    InvalidUrl,

    #[error("Invalid protocol")]
    InvalidProtocol,

    /// Rejected by the deny list or allow-list policy.
    #[error("Host not allowed")]
    HostNotAllowed,

    /// The host is, or resolves to, a private network address.
    #[error("Blocked host")]
    BlockedHost,

    #[error("Proxy timeout")]
    Timeout,

    /// Transport failure talking to the upstream; carries a detail message.
    #[error("Proxy failure")]
    Failure(String),

    /// Upstream answered with a non-success status.
    #[error("Upstream error")]
    Upstream(StatusCode),

    #[error("Response too large")]
    TooLarge,
}

impl ErrorCode for ProxyError {
    fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::MissingUrl => "missing_url",
            Self::InvalidUrl => "invalid_url",
            Self::InvalidProtocol => "invalid_protocol",
            Self::HostNotAllowed => "host_not_allowed",
            Self::BlockedHost => "blocked_host",
            Self::Timeout => "proxy_timeout",
            Self::Failure(_) => "proxy_failure",
            Self::Upstream(_) => "upstream_error",
            Self::TooLarge => "response_too_large",
        }
    }
}

impl ProxyError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingUrl | Self::InvalidUrl | Self::InvalidProtocol => StatusCode::BAD_REQUEST,
            Self::HostNotAllowed | Self::BlockedHost => StatusCode::FORBIDDEN,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Failure(_) => StatusCode::BAD_GATEWAY,
            Self::Upstream(status) if status.is_client_error() || status.is_server_error() => {
                *status
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let detail = match &self {
            Self::Failure(detail) => Some(detail.as_str()),
            _ => None,
        };
        let mut response =
            api_error(self.status_code(), self.code(), &self, detail).into_response();
        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Deny list first, then allow list, then the public-host default.
#[must_use]
pub fn is_allowed_host(config: &ProxyConfig, host: &str) -> bool {
    if matches_any(&config.denied_hosts, host) {
        return false;
    }
    if matches_any(&config.allowed_hosts, host) {
        return true;
    }
    config.allow_all_public_hosts
}

/// Loopback, RFC 1918, link-local, unique-local and unspecified addresses.
#[must_use]
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_v4(v4);
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

/// Whether the URL's host is, or resolves to, a private address.
///
/// Hosts that fail to resolve are treated as private.
pub async fn resolves_to_private_ip(url: &Url) -> bool {
    match url.host() {
        None => true,
        Some(Host::Ipv4(ip)) => is_private_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_private_ip(IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => {
            let port = url.port_or_known_default().unwrap_or(80);
            match tokio::net::lookup_host((domain, port)).await {
                Ok(addrs) => {
                    let mut any = false;
                    for addr in addrs {
                        any = true;
                        if is_private_ip(addr.ip()) {
                            return true;
                        }
                    }
                    !any
                }
                Err(e) => {
                    log::debug!("[Proxy] DNS lookup failed for {}: {}", domain, e);
                    true
                }
            }
        }
    }
}

/// `no-store` for open-ended live streams, a short public cache otherwise.
#[must_use]
pub fn cache_control(content_length: Option<&HeaderValue>, content_range: Option<&HeaderValue>) -> &'static str {
    if content_length.is_none() && content_range.is_none() {
        CACHE_LIVE
    } else {
        CACHE_FINITE
    }
}

/// Parses and screens the `url` query value.
pub async fn validate_target(config: &ProxyConfig, target: Option<&str>) -> Result<Url, ProxyError> {
    let target = target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ProxyError::MissingUrl)?;
    let url = Url::parse(target).map_err(|_| ProxyError::InvalidUrl)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidProtocol);
    }
    let host = url.host_str().ok_or(ProxyError::InvalidUrl)?;
    if !is_allowed_host(config, host) {
        log::warn!("[Proxy] Host not allowed: {}", host);
        return Err(ProxyError::HostNotAllowed);
    }
    if resolves_to_private_ip(&url).await {
        log::warn!("[Proxy] Blocked private target: {}", host);
        return Err(ProxyError::BlockedHost);
    }
    Ok(url)
}

/// Resolves a redirect `Location` against `current` and screens the new hop.
pub async fn next_hop(
    config: &ProxyConfig,
    current: &Url,
    location: &HeaderValue,
) -> Result<Url, ProxyError> {
    let location = location.to_str().map_err(|_| ProxyError::InvalidUrl)?;
    let next = current.join(location).map_err(|_| ProxyError::InvalidUrl)?;
    validate_target(config, Some(next.as_str())).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    url: Option<String>,
}

/// Streams the upstream audio named by `?url=`.
pub async fn proxy_audio(
    State(state): State<ProxyState>,
    method: Method,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Response {
    match forward(&state, &method, query.url.as_deref(), &headers).await {
        Ok(response) => response,
        Err(e) => {
            log::debug!("[Proxy] {} ({})", e, e.code());
            e.into_response()
        }
    }
}

async fn fetch(
    state: &ProxyState,
    method: reqwest::Method,
    url: &Url,
    range: Option<&HeaderValue>,
) -> Result<reqwest::Response, ProxyError> {
    let follow = async {
        let mut current = url.clone();
        for _ in 0..=MAX_PROXY_REDIRECTS {
            let mut request = state.client.request(method.clone(), current.clone());
            if let Some(range) = range {
                request = request.header(header::RANGE, range.clone());
            }
            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    ProxyError::Timeout
                } else {
                    ProxyError::Failure(friendly_network_error(&e))
                }
            })?;
            if !response.status().is_redirection() {
                return Ok(response);
            }
            let Some(location) = response.headers().get(header::LOCATION) else {
                return Ok(response);
            };
            current = next_hop(&state.config, &current, location).await?;
            log::debug!("[Proxy] Following redirect to {}", current);
        }
        Err(ProxyError::Failure("Too many redirects".to_string()))
    };
    tokio::time::timeout(state.config.request_timeout(), follow)
        .await
        .map_err(|_| ProxyError::Timeout)?
}

async fn forward(
    state: &ProxyState,
    method: &Method,
    target: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response, ProxyError> {
    let is_head = *method == Method::HEAD;
    if !is_head && *method != Method::GET {
        return Err(ProxyError::MethodNotAllowed);
    }
    let url = validate_target(&state.config, target).await?;
    let range = headers.get(header::RANGE);

    let upstream_method = if is_head {
        reqwest::Method::HEAD
    } else {
        reqwest::Method::GET
    };
    let mut upstream = fetch(state, upstream_method, &url, range).await?;
    if is_head && !upstream.status().is_success() {
        log::debug!("[Proxy] HEAD rejected by upstream ({}); retrying as GET", upstream.status());
        upstream = fetch(state, reqwest::Method::GET, &url, range).await?;
    }

    let status = upstream.status();
    if !status.is_success() {
        log::warn!("[Proxy] Upstream {} answered {}", url, status);
        return Err(ProxyError::Upstream(status));
    }

    let upstream_headers = upstream.headers();
    let content_type = upstream_headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let content_range = upstream_headers.get(header::CONTENT_RANGE).cloned();
    let content_length = upstream_headers.get(header::CONTENT_LENGTH).cloned();

    let declared_length = content_length
        .as_ref()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if !is_head
        && content_range.is_none()
        && declared_length.is_some_and(|len| len > state.config.max_content_length)
    {
        return Err(ProxyError::TooLarge);
    }

    let final_url = HeaderValue::from_str(upstream.url().as_str())
        .map_err(|e| ProxyError::Failure(e.to_string()))?;
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CACHE_CONTROL,
            cache_control(content_length.as_ref(), content_range.as_ref()),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header("X-Proxy-Upstream", final_url)
        .header("X-Proxy-Status", status.as_u16().to_string());
    if let Some(range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, range);
    }
    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    log::info!("[Proxy] {} {} -> {}", method, url, status);
    let body = if is_head {
        Body::empty()
    } else {
        Body::from_stream(upstream.bytes_stream())
    };
    builder
        .body(body)
        .map_err(|e| ProxyError::Failure(e.to_string()))
}
