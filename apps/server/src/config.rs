//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ariyo_core::{EngineConfig, ProxyConfig, StationDescriptor};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    /// Override: `ARIYO_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Port to bind the HTTP server to.
    /// Override: `ARIYO_BIND_PORT`
    pub bind_port: u16,

    /// Audio proxy policy.
    pub proxy: ProxyConfig,

    /// Recovery tuning for the stream monitor.
    /// Overrides: `ARIYO_MAX_RETRIES`, `ARIYO_STALL_TIMEOUT_MS`
    pub engine: EngineConfig,

    /// Station catalog available to the monitor.
    pub stations: Vec<StationDescriptor>,

    /// Station id or name to monitor on startup.
    /// Override: `ARIYO_MONITOR` (via clap in main.rs)
    pub monitor: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 8787,
            proxy: ProxyConfig::default(),
            engine: EngineConfig::default(),
            stations: Vec::new(),
            monitor: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `ARIYO_*` overrides read through `lookup`. Unparsable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ip) = lookup("ARIYO_BIND_ADDRESS").and_then(|v| v.parse().ok()) {
            self.bind_address = ip;
        }
        if let Some(port) = lookup("ARIYO_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }
        if let Some(retries) = lookup("ARIYO_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.engine.max_retries = retries;
        }
        if let Some(ms) = lookup("ARIYO_STALL_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.engine.stall_timeout_ms = ms;
        }
    }

    /// Checks the embedded core configurations.
    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .map_err(|e| anyhow!("Invalid engine configuration: {e}"))?;
        self.proxy
            .validate()
            .map_err(|e| anyhow!("Invalid proxy configuration: {e}"))?;
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }

    /// Engine configuration for the in-process monitor.
    ///
    /// A relative proxy base is made absolute against this server, since the
    /// monitor fetches streams itself rather than through a page.
    pub fn monitor_engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        if engine.resolver.proxy_base.starts_with('/') {
            let host = if self.bind_address.is_unspecified() {
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            } else {
                self.bind_address
            };
            let origin = SocketAddr::new(host, self.bind_port);
            engine.resolver.proxy_base = format!("http://{}{}", origin, engine.resolver.proxy_base);
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_yaml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_port, 8787);
        assert!(config.stations.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_yaml_with_stations() {
        let file = write_yaml(
            r#"
bind_port: 9000
engine:
  max_retries: 3
  resolver:
    proxy_hosts: ["*.zeno.fm"]
proxy:
  allow_all_public_hosts: false
  allowed_hosts: ["zeno.fm"]
stations:
  - id: joy
    name: Joy FM
    streamUrl: https://joy.example/live
  - id: 7
    title: Seven
    url: https://seven.example/live.pls
monitor: joy
"#,
        );
        let config = ServerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.stall_timeout_ms, 12_000);
        assert!(!config.proxy.allow_all_public_hosts);
        assert_eq!(config.stations.len(), 2);
        assert_eq!(config.stations[1].name.as_deref(), Some("Seven"));
        assert_eq!(
            config.stations[1].playable_url(),
            Some("https://seven.example/live.pls")
        );
        assert_eq!(config.monitor.as_deref(), Some("joy"));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let file = write_yaml("bind_port: [not, a, port]\n");
        let err = ServerConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("ARIYO_BIND_PORT", "9100"),
            ("ARIYO_MAX_RETRIES", "lots"),
            ("ARIYO_STALL_TIMEOUT_MS", "5000"),
        ]
        .into_iter()
        .collect();
        let mut config = ServerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind_port, 9100);
        assert_eq!(config.engine.max_retries, 6);
        assert_eq!(config.engine.stall_timeout_ms, 5000);
    }

    #[test]
    fn invalid_engine_config_fails_validation() {
        let mut config = ServerConfig::default();
        config.engine.jitter_ratio = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn monitor_proxy_base_points_at_this_server() {
        let config = ServerConfig {
            bind_port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(
            config.monitor_engine_config().resolver.proxy_base,
            "http://127.0.0.1:9000/api/radio/proxy"
        );

        let mut absolute = ServerConfig::default();
        absolute.engine.resolver.proxy_base = "https://edge.example/proxy".into();
        assert_eq!(
            absolute.monitor_engine_config().resolver.proxy_base,
            "https://edge.example/proxy"
        );
    }
}
