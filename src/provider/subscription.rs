//! Subscription lists
//!
//! Fetches per-protocol URL lists of free proxies. Each upstream list is
//! either plain `ip:port` lines or a geonode-style JSON envelope with a
//! `data` array of `{ip, port}` objects. Lists published under an `https`
//! heading are folded into the `http` bucket; both speak HTTP on the wire.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{SourceProvider, FETCH_CONCURRENCY, FETCH_TIMEOUT};
use crate::config::SourcesConfig;
use crate::hub::LogChannel;
use crate::pool::Protocol;

static PROXY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}:\d{1,5}$").expect("proxy line pattern")
});

pub struct SubscriptionProvider {
    sources: Vec<(Protocol, String)>,
}

impl SubscriptionProvider {
    pub fn new(config: &SourcesConfig) -> Self {
        let mut sources = Vec::new();
        for url in config.http.iter().chain(config.https.iter()) {
            sources.push((Protocol::Http, url.clone()));
        }
        for url in &config.socks4 {
            sources.push((Protocol::Socks4, url.clone()));
        }
        for url in &config.socks5 {
            sources.push((Protocol::Socks5, url.clone()));
        }
        SubscriptionProvider { sources }
    }
}

#[async_trait]
impl SourceProvider for SubscriptionProvider {
    fn name(&self) -> &str {
        "subscription"
    }

    async fn produce(&self, logs: &LogChannel) -> HashMap<Protocol, HashSet<String>> {
        let client = match reqwest::Client::builder().timeout(FETCH_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                logs.warn(format!("subscription client unavailable: {}", e));
                return HashMap::new();
            }
        };

        let sources: Vec<(Protocol, String)> = self.sources.clone();
        let fetched: Vec<(Protocol, Vec<String>)> =
            stream::iter(sources.into_iter().map(|(protocol, url)| {
                let client = client.clone();
                let logs = logs.clone();
                async move {
                    let proxies = fetch_list(&client, &url, &logs).await;
                    (protocol, proxies)
                }
            }))
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut result: HashMap<Protocol, HashSet<String>> = HashMap::new();
        for (protocol, proxies) in fetched {
            result.entry(protocol).or_default().extend(proxies);
        }
        result
    }
}

async fn fetch_list(client: &reqwest::Client, url: &str, logs: &LogChannel) -> Vec<String> {
    let host = display_host(url);
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            logs.warn(format!("fetch from {} failed: {}", host, e));
            return Vec::new();
        }
    };
    let body = match response.error_for_status() {
        Ok(r) => match r.text().await {
            Ok(body) => body,
            Err(e) => {
                logs.warn(format!("fetch from {} failed: {}", host, e));
                return Vec::new();
            }
        },
        Err(e) => {
            logs.warn(format!("fetch from {} failed: {}", host, e));
            return Vec::new();
        }
    };

    let proxies = parse_proxies(&body);
    if proxies.is_empty() {
        debug!("fetch from {} returned nothing usable", host);
    } else {
        logs.info(format!("fetched {} proxies from {}", proxies.len(), host));
    }
    proxies
}

/// Parse a proxy list from plain text or a geonode-style JSON envelope.
pub fn parse_proxies(text: &str) -> Vec<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(items) = value.get("data").and_then(|d| d.as_array()) {
            return items
                .iter()
                .filter_map(|item| {
                    let ip = item.get("ip")?.as_str()?;
                    let port = item.get("port")?;
                    let port = match port.as_str() {
                        Some(p) => p.to_string(),
                        None => port.as_u64()?.to_string(),
                    };
                    Some(format!("{}:{}", ip, port))
                })
                .collect();
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| PROXY_LINE.is_match(line))
        .map(str::to_string)
        .collect()
}

fn display_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_lines() {
        let text = "1.2.3.4:8080\n# comment\nnot a proxy\n 5.6.7.8:1080 \n999.999.1.1:bad\n";
        let proxies = parse_proxies(text);
        assert_eq!(proxies, vec!["1.2.3.4:8080", "5.6.7.8:1080"]);
    }

    #[test]
    fn test_parse_geonode_json() {
        let text = r#"{"data": [{"ip": "1.2.3.4", "port": "8080"}, {"ip": "5.6.7.8", "port": 1080}]}"#;
        let proxies = parse_proxies(text);
        assert_eq!(proxies, vec!["1.2.3.4:8080", "5.6.7.8:1080"]);
    }

    #[test]
    fn test_parse_json_without_data_falls_back_to_lines() {
        let text = r#"{"unrelated": true}"#;
        assert!(parse_proxies(text).is_empty());
    }

    #[test]
    fn test_https_sources_fold_into_http() {
        let config = SourcesConfig {
            http: vec!["http://a.example/list".to_string()],
            https: vec!["http://b.example/list".to_string()],
            socks4: vec![],
            socks5: vec!["http://c.example/list".to_string()],
        };
        let provider = SubscriptionProvider::new(&config);
        let http_count = provider
            .sources
            .iter()
            .filter(|(p, _)| *p == Protocol::Http)
            .count();
        assert_eq!(http_count, 2);
        assert_eq!(provider.sources.len(), 3);
    }

    #[test]
    fn test_display_host() {
        assert_eq!(display_host("https://example.com/a/b?c=d"), "example.com");
    }
}
