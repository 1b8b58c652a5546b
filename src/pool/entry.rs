//! Pool entry types and scoring

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Socks4,
    Socks5,
}

impl Protocol {
    /// URL scheme understood by the probe client
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Socks4 => write!(f, "SOCKS4"),
            Protocol::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

impl TryFrom<&str> for Protocol {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" | "https" => Ok(Protocol::Http),
            "socks4" => Ok(Protocol::Socks4),
            "socks5" | "socks" => Ok(Protocol::Socks5),
            _ => Err(Error::parse(format!("Unknown proxy protocol: {}", s))),
        }
    }
}

/// Anonymity class derived from the echoed-headers probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anonymity {
    Transparent,
    Anonymous,
    Elite,
    Unknown,
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anonymity::Transparent => write!(f, "Transparent"),
            Anonymity::Anonymous => write!(f, "Anonymous"),
            Anonymity::Elite => write!(f, "Elite"),
            Anonymity::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Pool entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Working,
    Unavailable,
    Failed,
}

/// A validated upstream proxy held by the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    /// `host:port`, unique within the pool
    #[serde(rename = "proxy")]
    pub address: String,
    pub protocol: Protocol,
    /// Measured round-trip time in seconds
    pub latency: f64,
    /// Measured throughput in Mbps
    pub speed: f64,
    pub anonymity: Anonymity,
    pub location: String,
    pub score: f64,
    pub status: Status,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl PoolEntry {
    pub fn new(address: String, protocol: Protocol) -> Self {
        PoolEntry {
            address,
            protocol,
            latency: f64::INFINITY,
            speed: 0.0,
            anonymity: Anonymity::Unknown,
            location: "Unknown".to_string(),
            score: 0.0,
            status: Status::Working,
            consecutive_failures: 0,
        }
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency * 1000.0
    }
}

/// Composite rank of a validated proxy.
///
/// Pure in its inputs: +50 elite / +30 anonymous, up to +50 for throughput
/// (2 points per Mbps), up to −50 for latency (10 points per second), floored
/// at zero.
pub fn score(anonymity: Anonymity, speed_mbps: f64, latency_secs: f64) -> f64 {
    let mut score = match anonymity {
        Anonymity::Elite => 50.0,
        Anonymity::Anonymous => 30.0,
        _ => 0.0,
    };
    score += (speed_mbps * 2.0).min(50.0);
    score -= (latency_secs * 10.0).min(50.0);
    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::try_from("http").unwrap(), Protocol::Http);
        assert_eq!(Protocol::try_from("https").unwrap(), Protocol::Http);
        assert_eq!(Protocol::try_from("SOCKS5").unwrap(), Protocol::Socks5);
        assert_eq!(Protocol::try_from("socks4").unwrap(), Protocol::Socks4);
        assert!(Protocol::try_from("quic").is_err());
    }

    #[test]
    fn test_protocol_scheme_roundtrip() {
        for p in [Protocol::Http, Protocol::Socks4, Protocol::Socks5] {
            assert_eq!(Protocol::try_from(p.url_scheme()).unwrap(), p);
        }
    }

    #[test]
    fn test_score_components() {
        // Elite, fast, instant: the ceiling.
        assert_eq!(score(Anonymity::Elite, 100.0, 0.0), 100.0);
        assert_eq!(score(Anonymity::Anonymous, 0.0, 0.0), 30.0);
        assert_eq!(score(Anonymity::Transparent, 0.0, 0.0), 0.0);

        // Throughput bonus caps at 50, latency penalty at 50.
        assert_eq!(score(Anonymity::Unknown, 1000.0, 0.0), 50.0);
        assert_eq!(score(Anonymity::Elite, 25.0, 3.0), 50.0 + 50.0 - 30.0);
        assert_eq!(score(Anonymity::Unknown, 0.0, 100.0), 0.0);
    }

    #[test]
    fn test_score_bounds() {
        for anon in [
            Anonymity::Elite,
            Anonymity::Anonymous,
            Anonymity::Transparent,
            Anonymity::Unknown,
        ] {
            for speed in [0.0, 1.0, 25.0, 1000.0] {
                for latency in [0.0, 0.5, 7.0, 60.0] {
                    let s = score(anon, speed, latency);
                    assert!((0.0..=130.0).contains(&s), "score {} out of range", s);
                }
            }
        }
    }

    #[test]
    fn test_entry_serialized_shape() {
        let entry = PoolEntry::new("1.2.3.4:8080".to_string(), Protocol::Socks5);
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["proxy"], "1.2.3.4:8080");
        assert_eq!(v["protocol"], "SOCKS5");
        assert_eq!(v["status"], "Working");
    }
}
