//! Asset-search engine providers
//!
//! FOFA, Quake and Hunter expose paid search APIs over the public internet's
//! listening services; queried for SOCKS5 banners they are a second stream of
//! candidates next to the subscription lists. Each client maps its engine's
//! response shape to plain `host:port` strings and swallows its own failures.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::SourceProvider;
use crate::config::EngineConfig;
use crate::hub::LogChannel;
use crate::pool::Protocol;

const ENGINE_TIMEOUT: Duration = Duration::from_secs(10);

fn engine_client() -> Option<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(ENGINE_TIMEOUT)
        .build()
        .ok()
}

fn socks5_set(addresses: Vec<String>) -> HashMap<Protocol, HashSet<String>> {
    let mut map = HashMap::new();
    map.insert(Protocol::Socks5, addresses.into_iter().collect());
    map
}

/// FOFA search client. The key is `email:key`; the query travels hex-encoded
/// in the `qbase64` parameter, matching what the service accepts.
pub struct FofaProvider {
    config: EngineConfig,
}

impl FofaProvider {
    pub fn new(config: EngineConfig) -> Self {
        FofaProvider { config }
    }
}

#[async_trait]
impl SourceProvider for FofaProvider {
    fn name(&self) -> &str {
        "fofa"
    }

    async fn produce(&self, logs: &LogChannel) -> HashMap<Protocol, HashSet<String>> {
        let Some((email, key)) = self.config.key.split_once(':') else {
            logs.warn("fofa key must be 'email:key'".to_string());
            return HashMap::new();
        };
        let Some(client) = engine_client() else {
            return HashMap::new();
        };

        let url = format!(
            "https://fofa.info/api/v1/search/all?email={}&key={}&qbase64={}&size={}&page=1&fields=host,port",
            email,
            key,
            hex::encode(&self.config.query),
            self.config.size
        );

        let addresses = match fetch_json(client.get(&url)).await {
            Some(data) => data
                .get("results")
                .and_then(Value::as_array)
                .map(|results| {
                    results
                        .iter()
                        .filter_map(|item| {
                            let host = item.get(0)?.as_str()?;
                            let port = field_to_string(item.get(1)?)?;
                            Some(format!("{}:{}", host, port))
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => {
                logs.warn("fofa search failed".to_string());
                return HashMap::new();
            }
        };
        socks5_set(addresses)
    }
}

/// Quake search client
pub struct QuakeProvider {
    config: EngineConfig,
}

impl QuakeProvider {
    pub fn new(config: EngineConfig) -> Self {
        QuakeProvider { config }
    }
}

#[async_trait]
impl SourceProvider for QuakeProvider {
    fn name(&self) -> &str {
        "quake"
    }

    async fn produce(&self, logs: &LogChannel) -> HashMap<Protocol, HashSet<String>> {
        let Some(client) = engine_client() else {
            return HashMap::new();
        };

        let request = client
            .post("https://quake.360.cn/api/v3/search/quake_service")
            .header("X-QuakeToken", &self.config.key)
            .json(&json!({
                "query": self.config.query,
                "size": self.config.size,
                "ignore_cache": false,
            }));

        let addresses = match fetch_json(request).await {
            Some(data) => data
                .get("data")
                .and_then(Value::as_array)
                .map(|results| {
                    results
                        .iter()
                        .filter_map(|item| {
                            let ip = item.get("ip")?.as_str()?;
                            let port = field_to_string(item.get("port")?)?;
                            Some(format!("{}:{}", ip, port))
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => {
                logs.warn("quake search failed".to_string());
                return HashMap::new();
            }
        };
        socks5_set(addresses)
    }
}

/// Hunter search client
pub struct HunterProvider {
    config: EngineConfig,
}

impl HunterProvider {
    pub fn new(config: EngineConfig) -> Self {
        HunterProvider { config }
    }
}

#[async_trait]
impl SourceProvider for HunterProvider {
    fn name(&self) -> &str {
        "hunter"
    }

    async fn produce(&self, logs: &LogChannel) -> HashMap<Protocol, HashSet<String>> {
        let Some(client) = engine_client() else {
            return HashMap::new();
        };

        let url = format!(
            "https://hunter.qianxin.com/openApi/search?api-key={}&search={}&page=1&page_size={}&is_web=3",
            self.config.key, self.config.query, self.config.size
        );

        let addresses = match fetch_json(client.get(&url)).await {
            Some(data) => data
                .get("data")
                .and_then(|d| d.get("arr"))
                .and_then(Value::as_array)
                .map(|results| {
                    results
                        .iter()
                        .filter_map(|item| {
                            let ip = item.get("ip")?.as_str()?;
                            let port = field_to_string(item.get("port")?)?;
                            Some(format!("{}:{}", ip, port))
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => {
                logs.warn("hunter search failed".to_string());
                return HashMap::new();
            }
        };
        socks5_set(addresses)
    }
}

async fn fetch_json(request: reqwest::RequestBuilder) -> Option<Value> {
    let response = request.send().await.ok()?;
    response.error_for_status().ok()?.json().await.ok()
}

fn field_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_to_string() {
        assert_eq!(field_to_string(&json!("8080")), Some("8080".to_string()));
        assert_eq!(field_to_string(&json!(1080)), Some("1080".to_string()));
        assert_eq!(field_to_string(&json!(null)), None);
    }

    #[test]
    fn test_fofa_query_hex_encoding() {
        // The query parameter is hex, not base64, despite its name.
        assert_eq!(hex::encode("protocol==\"socks5\""), "70726f746f636f6c3d3d22736f636b733522");
    }

    #[tokio::test]
    async fn test_fofa_rejects_malformed_key() {
        let provider = FofaProvider::new(EngineConfig {
            enabled: true,
            key: "missing-colon".to_string(),
            query: "protocol==\"socks5\"".to_string(),
            size: 10,
        });
        let produced = provider.produce(&LogChannel::new()).await;
        assert!(produced.is_empty());
    }
}
