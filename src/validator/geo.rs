//! IP geolocation
//!
//! Resolves a proxy host to a country display string through a chain of
//! three HTTP providers; the first success wins. Results are cached
//! process-wide by IP. Known English country names are translated when the
//! configured display locale is `zh`.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const UNKNOWN_LOCATION: &str = "Unknown";

static LOCATION_CACHE: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

fn zh_name(country: &str) -> Option<&'static str> {
    match country {
        "China" => Some("中国"),
        "Hong Kong" => Some("香港"),
        "Singapore" => Some("新加坡"),
        "United States" => Some("美国"),
        "Japan" => Some("日本"),
        "South Korea" => Some("韩国"),
        "Russia" => Some("俄罗斯"),
        "Germany" => Some("德国"),
        "United Kingdom" => Some("英国"),
        "France" => Some("法国"),
        "Canada" => Some("加拿大"),
        "Taiwan" => Some("台湾"),
        "Netherlands" => Some("荷兰"),
        "India" => Some("印度"),
        "Vietnam" => Some("越南"),
        "Thailand" => Some("泰国"),
        _ => None,
    }
}

/// Translate a country name into the configured display locale.
pub fn localize(country: &str, locale: &str) -> String {
    if locale == "zh" {
        if let Some(translated) = zh_name(country) {
            return translated.to_string();
        }
    }
    country.to_string()
}

/// Look up the country for an IP, consulting the cache first.
pub async fn lookup(ip: &str, locale: &str) -> String {
    if let Some(cached) = LOCATION_CACHE.get(ip) {
        return cached.clone();
    }

    let location = match resolve(ip).await {
        Some(country) => localize(&country, locale),
        None => UNKNOWN_LOCATION.to_string(),
    };
    LOCATION_CACHE.insert(ip.to_string(), location.clone());
    location
}

async fn resolve(ip: &str) -> Option<String> {
    if let Some(country) = query_ip_api(ip).await {
        return Some(country);
    }
    if let Some(country) = query_taobao(ip).await {
        return Some(country);
    }
    query_ip_sb(ip).await
}

async fn fetch_json(url: &str, timeout: Duration) -> Option<Value> {
    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("geo lookup {} failed: {}", url, e);
            return None;
        }
    };
    response.error_for_status().ok()?.json().await.ok()
}

async fn query_ip_api(ip: &str) -> Option<String> {
    let url = format!("http://ip-api.com/json/{}?fields=status,message,country", ip);
    let data = fetch_json(&url, Duration::from_secs(2)).await?;
    if data.get("status")?.as_str()? != "success" {
        return None;
    }
    non_empty(data.get("country")?.as_str()?)
}

async fn query_taobao(ip: &str) -> Option<String> {
    let url = format!(
        "https://ip.taobao.com/outGetIpInfo?ip={}&accessKey=alibaba-inc",
        ip
    );
    let data = fetch_json(&url, Duration::from_secs(3)).await?;
    if data.get("code")?.as_i64()? != 0 {
        return None;
    }
    non_empty(data.get("data")?.get("country")?.as_str()?)
}

async fn query_ip_sb(ip: &str) -> Option<String> {
    let url = format!("https://api.ip.sb/geoip/{}", ip);
    let data = fetch_json(&url, Duration::from_secs(3)).await?;
    non_empty(data.get("country")?.as_str()?)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
