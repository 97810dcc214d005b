//! Default tuning values for the playback engine and proxy.
//!
//! These are defaults, not protocol requirements. Every value here can be
//! overridden through [`EngineConfig`](crate::config::EngineConfig) or
//! [`ProxyConfig`](crate::config::ProxyConfig).

// ─────────────────────────────────────────────────────────────────────────────
// Recovery
// ─────────────────────────────────────────────────────────────────────────────

/// Hard-retry attempts allowed before the engine reports a terminal error.
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// Backoff delay for the first hard retry (milliseconds).
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound for the exponential backoff delay (milliseconds).
pub const DEFAULT_MAX_DELAY_MS: u64 = 16_000;

/// Fraction of the computed delay added as random jitter (0.0 - 1.0).
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Soft recoveries tried for one stall before escalating to a hard retry.
pub const DEFAULT_MAX_SOFT_ATTEMPTS: u32 = 2;

/// Forward nudge applied inside buffered media during soft recovery (seconds).
pub const DEFAULT_SOFT_NUDGE_SECS: f64 = 0.25;

/// How far before the last known position a reload resumes (milliseconds).
///
/// Decoders drop their lookahead on reload, so resuming exactly at the last
/// position produces an audible gap.
pub const DEFAULT_RESUME_REWIND_MS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Stall Watchdog
// ─────────────────────────────────────────────────────────────────────────────

/// Time without playback progress before the watchdog fires (milliseconds).
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 12_000;

// ─────────────────────────────────────────────────────────────────────────────
// Source Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Same-origin path of the audio proxy endpoint.
pub const DEFAULT_PROXY_BASE: &str = "/api/radio/proxy";

/// Query parameter carrying the cache-busting token on reloads.
pub const DEFAULT_CACHE_BUST_PARAM: &str = "_cb";

/// Maximum playlist nesting followed before giving up.
pub const MAX_PLAYLIST_DEPTH: usize = 5;

/// Timeout for playlist fetches (seconds).
pub const PLAYLIST_FETCH_TIMEOUT_SECS: u64 = 10;

/// User agent for outgoing HTTP requests.
pub const USER_AGENT: &str = concat!("Ariyo/", env!("CARGO_PKG_VERSION"));

// ─────────────────────────────────────────────────────────────────────────────
// Proxy Endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Upstream request timeout for the proxy endpoint (seconds).
pub const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 25;

/// Largest non-ranged upstream body the proxy will forward (bytes).
pub const DEFAULT_PROXY_MAX_CONTENT_LENGTH: u64 = 10 * 1024 * 1024;

/// Redirect hops the proxy follows, each screened like the original target.
pub const MAX_PROXY_REDIRECTS: usize = 10;

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "ariyo-server";

// ─────────────────────────────────────────────────────────────────────────────
// Headless Element
// ─────────────────────────────────────────────────────────────────────────────

/// Nominal bitrate used to turn received bytes into a playback position.
///
/// 128 kbps is the most common bitrate for MP3/AAC internet radio.
pub const HTTP_ELEMENT_NOMINAL_BITRATE_BPS: u64 = 128_000;

/// Minimum interval between `TimeUpdate` events from the headless element (ms).
pub const HTTP_ELEMENT_TIMEUPDATE_INTERVAL_MS: u64 = 250;
