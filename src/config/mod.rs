//! Configuration module

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP proxy listener
    pub http: ListenerConfig,

    /// SOCKS5 proxy listener
    pub socks5: ListenerConfig,

    /// Management API address; unset disables the API
    #[serde(rename = "external-controller")]
    pub external_controller: Option<String>,

    /// Pick a fresh upstream for every request instead of pinning `current`
    #[serde(rename = "rotate-per-request")]
    pub rotate_per_request: bool,

    /// Refresh the pool every N minutes; 0 disables the loop
    #[serde(rename = "auto-refresh-minutes")]
    pub auto_refresh_minutes: u64,

    /// Per-probe request timeout in seconds
    #[serde(rename = "probe-timeout-secs")]
    pub probe_timeout_secs: u64,

    /// Display locale for resolved country names ("en" or "zh")
    #[serde(rename = "display-locale")]
    pub display_locale: String,

    /// Filter installed on the pool at startup
    pub filter: FilterConfig,

    /// Probe target URLs
    pub validation: ValidationConfig,

    /// Subscription source URL lists, by protocol
    pub sources: SourcesConfig,

    /// Asset-search engine credentials
    pub engines: EnginesConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load from string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.http.listen.is_empty() {
            return Err(Error::config("http.listen must not be empty"));
        }
        if self.socks5.listen.is_empty() {
            return Err(Error::config("socks5.listen must not be empty"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(Error::config("probe-timeout-secs must be positive"));
        }
        for engine in [&self.engines.fofa, &self.engines.quake, &self.engines.hunter] {
            if engine.enabled && engine.key.is_empty() {
                return Err(Error::config("enabled asset engine requires a key"));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http: ListenerConfig {
                listen: "127.0.0.1:8888".to_string(),
            },
            socks5: ListenerConfig {
                listen: "127.0.0.1:1080".to_string(),
            },
            external_controller: Some("127.0.0.1:9090".to_string()),
            rotate_per_request: false,
            auto_refresh_minutes: 0,
            probe_timeout_secs: 5,
            display_locale: "en".to_string(),
            filter: FilterConfig::default(),
            validation: ValidationConfig::default(),
            sources: SourcesConfig::default(),
            engines: EnginesConfig::default(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Listen address, `host:port`
    pub listen: String,
}

/// Startup pool filter
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub region: Option<String>,
    #[serde(rename = "max-latency-ms")]
    pub max_latency_ms: Option<u64>,
}

/// Probe target URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    #[serde(rename = "latency-url")]
    pub latency_url: String,
    #[serde(rename = "anonymity-url")]
    pub anonymity_url: String,
    #[serde(rename = "speed-url")]
    pub speed_url: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            latency_url: "https://www.baidu.com".to_string(),
            anonymity_url: "http://httpbin.org/get?show_env=1".to_string(),
            speed_url: "http://cachefly.cachefly.net/100kb.test".to_string(),
        }
    }
}

/// Subscription source URL lists. The `https` list is folded into `http` by
/// the provider; it exists so upstream list formats can be pasted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub http: Vec<String>,
    pub https: Vec<String>,
    pub socks4: Vec<String>,
    pub socks5: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            http: vec![
                "https://api.proxyscrape.com/v3/free-proxy-list/get?request=displayproxies&protocol=http".to_string(),
                "https://openproxylist.xyz/http.txt".to_string(),
                "https://www.proxy-list.download/api/v1/get?type=http".to_string(),
                "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc&protocols=http".to_string(),
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt".to_string(),
            ],
            https: vec![
                "https://www.proxy-list.download/api/v1/get?type=https".to_string(),
            ],
            socks4: vec![
                "https://api.proxyscrape.com/v3/free-proxy-list/get?request=displayproxies&protocol=socks4".to_string(),
                "https://openproxylist.xyz/socks4.txt".to_string(),
                "https://www.proxy-list.download/api/v1/get?type=socks4".to_string(),
            ],
            socks5: vec![
                "https://api.proxyscrape.com/v3/free-proxy-list/get?request=displayproxies&protocol=socks5".to_string(),
                "https://openproxylist.xyz/socks5.txt".to_string(),
                "https://www.proxy-list.download/api/v1/get?type=socks5".to_string(),
            ],
        }
    }
}

/// One asset-search engine account
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub enabled: bool,
    /// API key; FOFA expects `email:key`
    pub key: String,
    pub query: String,
    pub size: u32,
}

/// Asset-search engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnginesConfig {
    pub fofa: EngineConfig,
    pub quake: EngineConfig,
    pub hunter: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe_timeout_secs, 5);
        assert!(!config.sources.socks5.is_empty());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let config = Config::from_str(
            r#"
http:
  listen: "0.0.0.0:8081"
socks5:
  listen: "0.0.0.0:1081"
rotate-per-request: true
display-locale: zh
filter:
  region: US
  max-latency-ms: 500
"#,
        )
        .unwrap();
        assert_eq!(config.http.listen, "0.0.0.0:8081");
        assert!(config.rotate_per_request);
        assert_eq!(config.display_locale, "zh");
        assert_eq!(config.filter.region.as_deref(), Some("US"));
        assert_eq!(config.filter.max_latency_ms, Some(500));
        // Untouched sections keep their defaults.
        assert_eq!(config.validation.latency_url, "https://www.baidu.com");
    }

    #[test]
    fn test_enabled_engine_requires_key() {
        let result = Config::from_str(
            r#"
engines:
  fofa:
    enabled: true
    query: protocol=="socks5"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_probe_timeout_rejected() {
        assert!(Config::from_str("probe-timeout-secs: 0").is_err());
    }
}
