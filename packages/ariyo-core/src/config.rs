//! Engine, resolver and proxy configuration.
//!
//! All structs deserialize with `#[serde(default)]` so partial YAML/JSON
//! documents fill in the defaults from [`protocol_constants`](crate::protocol_constants).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_CACHE_BUST_PARAM, DEFAULT_JITTER_RATIO, DEFAULT_MAX_DELAY_MS,
    DEFAULT_MAX_RETRIES, DEFAULT_MAX_SOFT_ATTEMPTS, DEFAULT_PROXY_BASE,
    DEFAULT_PROXY_MAX_CONTENT_LENGTH, DEFAULT_PROXY_TIMEOUT_SECS, DEFAULT_RESUME_REWIND_MS,
    DEFAULT_SOFT_NUDGE_SECS, DEFAULT_STALL_TIMEOUT_MS,
};

// ─────────────────────────────────────────────────────────────────────────────
// Host Patterns
// ─────────────────────────────────────────────────────────────────────────────

/// A domain suffix rule.
///
/// `example.com` matches `example.com` and any subdomain of it. A leading
/// `*.` is accepted and treated the same way, so `*.local` matches `local`
/// and `radio.local`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct HostPattern(String);

impl HostPattern {
    /// Creates a pattern, normalizing case and stripping any leading `*.`/`.`.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let trimmed = pattern.trim().to_ascii_lowercase();
        let suffix = trimmed
            .strip_prefix("*.")
            .or_else(|| trimmed.strip_prefix('.'))
            .unwrap_or(&trimmed);
        Self(suffix.to_string())
    }

    /// Returns true if `host` equals the pattern or is a subdomain of it.
    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        host == self.0
            || (host.len() > self.0.len()
                && host.ends_with(&self.0)
                && host.as_bytes()[host.len() - self.0.len() - 1] == b'.')
    }

    /// The normalized suffix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HostPattern {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for HostPattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<HostPattern> for String {
    fn from(value: HostPattern) -> Self {
        value.0
    }
}

/// Returns true if any pattern in `patterns` matches `host`.
#[must_use]
pub fn matches_any(patterns: &[HostPattern], host: &str) -> bool {
    patterns.iter().any(|p| p.matches(host))
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Rules the source resolver applies when turning a raw URL into a fetchable one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverPolicy {
    /// Whether the host page is served over https (mixed content is blocked).
    pub secure_context: bool,

    /// Hosts known to serve the same stream over https; their http URLs are upgraded.
    pub upgrade_insecure_hosts: Vec<HostPattern>,

    /// Hosts that always need CORS relief and are routed through the proxy.
    pub proxy_hosts: Vec<HostPattern>,

    /// Route remaining http URLs through the proxy when in a secure context.
    pub proxy_insecure: bool,

    /// Same-origin path (or absolute URL) of the proxy endpoint.
    pub proxy_base: String,

    /// Query parameter name for the cache-busting token.
    pub cache_bust_param: String,
}

impl ResolverPolicy {
    /// Validates the policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.proxy_base.trim().is_empty() {
            return Err("proxy_base must not be empty".to_string());
        }
        if self.cache_bust_param.trim().is_empty() {
            return Err("cache_bust_param must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            secure_context: true,
            upgrade_insecure_hosts: Vec::new(),
            proxy_hosts: Vec::new(),
            proxy_insecure: true,
            proxy_base: DEFAULT_PROXY_BASE.to_string(),
            cache_bust_param: DEFAULT_CACHE_BUST_PARAM.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine Config
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning for the recovery controller and stall watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard retries allowed before a terminal error.
    pub max_retries: u32,

    /// Delay for the first hard retry (milliseconds).
    pub base_delay_ms: u64,

    /// Cap on the backoff delay (milliseconds).
    pub max_delay_ms: u64,

    /// Random jitter added to each delay, as a fraction of it.
    pub jitter_ratio: f64,

    /// Time without progress before the watchdog fires (milliseconds).
    pub stall_timeout_ms: u64,

    /// Forward seek applied by soft recovery (seconds).
    pub soft_nudge_secs: f64,

    /// Soft recoveries per stall before escalating.
    pub max_soft_attempts: u32,

    /// Rewind applied to the resume position on reload (milliseconds).
    pub resume_rewind_ms: u64,

    /// Source resolution rules.
    pub resolver: ResolverPolicy,
}

impl EngineConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be >= 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err("jitter_ratio must be within 0.0..=1.0".to_string());
        }
        if self.stall_timeout_ms == 0 {
            return Err("stall_timeout_ms must be >= 1".to_string());
        }
        if !self.soft_nudge_secs.is_finite() || self.soft_nudge_secs <= 0.0 {
            return Err("soft_nudge_secs must be > 0".to_string());
        }
        self.resolver.validate()
    }

    /// Stall watchdog timeout as a `Duration`.
    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Resume rewind in seconds.
    #[must_use]
    pub fn resume_rewind_secs(&self) -> f64 {
        self.resume_rewind_ms as f64 / 1000.0
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
            soft_nudge_secs: DEFAULT_SOFT_NUDGE_SECS,
            max_soft_attempts: DEFAULT_MAX_SOFT_ATTEMPTS,
            resume_rewind_ms: DEFAULT_RESUME_REWIND_MS,
            resolver: ResolverPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy Config
// ─────────────────────────────────────────────────────────────────────────────

/// Host policy and limits for the same-origin proxy endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Hosts always allowed (still subject to the private-address check).
    pub allowed_hosts: Vec<HostPattern>,

    /// Hosts always refused.
    pub denied_hosts: Vec<HostPattern>,

    /// Allow public hosts that are not on the allow list.
    pub allow_all_public_hosts: bool,

    /// Upstream request timeout (seconds).
    pub request_timeout_secs: u64,

    /// Largest non-ranged body forwarded (bytes).
    pub max_content_length: u64,
}

impl ProxyConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be >= 1".to_string());
        }
        if self.max_content_length == 0 {
            return Err("max_content_length must be >= 1".to_string());
        }
        Ok(())
    }

    /// Upstream timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            denied_hosts: vec![
                HostPattern::new("localhost"),
                HostPattern::new("*.local"),
                HostPattern::new("*.internal"),
            ],
            allow_all_public_hosts: true,
            request_timeout_secs: DEFAULT_PROXY_TIMEOUT_SECS,
            max_content_length: DEFAULT_PROXY_MAX_CONTENT_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_pattern_matches_domain_and_subdomains() {
        let p = HostPattern::new("example.com");
        assert!(p.matches("example.com"));
        assert!(p.matches("cdn.example.com"));
        assert!(p.matches("CDN.Example.COM"));
        assert!(!p.matches("badexample.com"));
        assert!(!p.matches("example.com.evil.net"));
    }

    #[test]
    fn host_pattern_accepts_leading_wildcard() {
        let p = HostPattern::new("*.local");
        assert_eq!(p.as_str(), "local");
        assert!(p.matches("radio.local"));
        assert!(!p.matches("localhost"));
    }

    #[test]
    fn default_engine_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 6);
        assert_eq!(config.stall_timeout(), Duration::from_secs(12));
        assert!((config.resume_rewind_secs() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_out_of_range_jitter() {
        let config = EngineConfig {
            jitter_ratio: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_cap_below_base() {
        let config = EngineConfig {
            base_delay_ms: 2000,
            max_delay_ms: 1000,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_retries": 2, "resolver": {"proxy_hosts": ["*.zeno.fm"]}}"#)
                .unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.resolver.proxy_base, "/api/radio/proxy");
        assert!(config.resolver.proxy_hosts[0].matches("stream.zeno.fm"));
    }

    #[test]
    fn default_proxy_config_denies_local_names() {
        let config = ProxyConfig::default();
        assert!(matches_any(&config.denied_hosts, "localhost"));
        assert!(matches_any(&config.denied_hosts, "nas.local"));
        assert!(matches_any(&config.denied_hosts, "db.internal"));
        assert!(!matches_any(&config.denied_hosts, "radio.example"));
        assert!(config.validate().is_ok());
    }
}
