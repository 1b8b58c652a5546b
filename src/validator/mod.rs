//! Proxy validation pipeline
//!
//! Stage A is a cheap TCP pre-check that discards peers whose port is not
//! even open. Stage B tunnels real HTTP probes through each survivor:
//! latency, anonymity classification, throughput and geolocation, folded into
//! a deterministic score. Survivors are emitted on a bounded channel as
//! `Working` pool entries; a terminal marker follows only when the run was
//! not cancelled, so consumers treat a closed channel without the marker as
//! cancellation.

pub mod geo;
pub mod public_ip;

use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ValidationConfig;
use crate::hub::LogChannel;
use crate::pool::{score, Anonymity, PoolEntry, Status};
use crate::provider::Candidate;

/// TCP pre-check handshake budget
pub const PRECHECK_TIMEOUT: Duration = Duration::from_millis(1500);

/// Above this many candidates the pre-check costs more than it saves.
pub const PRECHECK_SKIP_THRESHOLD: usize = 10_000;

/// Concurrent pre-check dialers
pub const PRECHECK_CONCURRENCY: usize = 500;

/// Concurrent full probes
pub const PROBE_CONCURRENCY: usize = 100;

/// Latency above which the throughput probe is pointless
const SPEED_PROBE_LATENCY_CUTOFF: f64 = 7.0;

/// Hard cap on the throughput stream
const SPEED_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Message emitted on the validator's results channel
#[derive(Debug)]
pub enum ValidatorEvent {
    /// A candidate passed every mandatory check.
    Entry(PoolEntry),
    /// Normal completion. Never sent after cancellation.
    Finished,
}

/// Two-stage proxy validator
pub struct Validator {
    targets: ValidationConfig,
    probe_timeout: Duration,
    locale: String,
}

impl Validator {
    pub fn new(targets: ValidationConfig, probe_timeout: Duration, locale: String) -> Self {
        Validator {
            targets,
            probe_timeout,
            locale,
        }
    }

    /// Run both stages over `candidates`, emitting events on `results`.
    pub async fn validate(
        &self,
        candidates: Vec<Candidate>,
        results: mpsc::Sender<ValidatorEvent>,
        cancel: CancellationToken,
        logs: LogChannel,
    ) {
        let total = candidates.len();

        let survivors = if should_skip_precheck(total) {
            logs.warn(format!(
                "{} candidates exceed the pre-check threshold; skipping TCP pre-check",
                total
            ));
            candidates
        } else {
            logs.info(format!("TCP pre-check starting for {} candidates", total));
            let survivors = tokio::select! {
                _ = cancel.cancelled() => return,
                survivors = pre_check_all(candidates) => survivors,
            };
            logs.info(format!(
                "TCP pre-check done: {} / {} reachable",
                survivors.len(),
                total
            ));
            survivors
        };

        if cancel.is_cancelled() {
            return;
        }

        if survivors.is_empty() {
            let _ = results.send(ValidatorEvent::Finished).await;
            return;
        }

        logs.info(format!("full probe starting for {} survivors", survivors.len()));

        let mut probes = stream::iter(
            survivors
                .into_iter()
                .map(|candidate| self.full_probe(candidate, cancel.clone())),
        )
        .buffer_unordered(PROBE_CONCURRENCY);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = probes.next() => match outcome {
                    Some(Some(entry)) => {
                        if results.send(ValidatorEvent::Entry(entry)).await.is_err() {
                            return;
                        }
                    }
                    Some(None) => {}
                    None => break,
                },
            }
        }

        if !cancel.is_cancelled() {
            let _ = results.send(ValidatorEvent::Finished).await;
        }
    }

    /// Full quality probe for a single candidate. Returns `None` when the
    /// candidate fails a mandatory step or the run is cancelled; failed
    /// candidates are dropped, never emitted.
    async fn full_probe(
        &self,
        candidate: Candidate,
        cancel: CancellationToken,
    ) -> Option<PoolEntry> {
        if cancel.is_cancelled() {
            return None;
        }

        let client = match self.probe_client(&candidate) {
            Ok(client) => client,
            Err(e) => {
                debug!("probe client for {} failed: {}", candidate.address, e);
                return None;
            }
        };

        let mut entry = PoolEntry::new(candidate.address.clone(), candidate.protocol);

        // Latency: a failed HEAD demotes the candidate outright.
        let start = Instant::now();
        match client.head(&self.targets.latency_url).send().await {
            Ok(response) if response.status().is_success() => {
                entry.latency = start.elapsed().as_secs_f64();
            }
            Ok(response) => {
                debug!("latency probe {}: status {}", entry.address, response.status());
                return None;
            }
            Err(e) => {
                debug!("latency probe {}: {}", entry.address, e);
                return None;
            }
        }

        if cancel.is_cancelled() {
            return None;
        }

        entry.anonymity = match self.probe_anonymity(&client).await {
            Some(anonymity) => anonymity,
            None => return None,
        };

        if cancel.is_cancelled() {
            return None;
        }

        // Throughput is optional: transparent proxies and slow peers skip it,
        // and probe errors leave it at zero.
        if wants_speed_probe(entry.anonymity, entry.latency) {
            entry.speed = self.probe_speed(&client, &cancel).await?;
        }

        if cancel.is_cancelled() {
            return None;
        }

        let host = entry.address.split(':').next().unwrap_or(&entry.address);
        entry.location = geo::lookup(host, &self.locale).await;

        entry.score = score(entry.anonymity, entry.speed, entry.latency);
        entry.status = Status::Working;
        Some(entry)
    }

    fn probe_client(&self, candidate: &Candidate) -> crate::Result<reqwest::Client> {
        let proxy = reqwest::Proxy::all(format!(
            "{}://{}",
            candidate.protocol.url_scheme(),
            candidate.address
        ))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.probe_timeout)
            .user_agent(PROBE_USER_AGENT)
            .build()?;
        Ok(client)
    }

    async fn probe_anonymity(&self, client: &reqwest::Client) -> Option<Anonymity> {
        let response = match client.get(&self.targets.anonymity_url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("anonymity probe failed: {}", e);
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        let data: serde_json::Value = response.json().await.ok()?;
        Some(classify_anonymity(&data, public_ip::get()))
    }

    /// Stream the speed-check URL and compute Mbps. Errors are tolerated and
    /// yield zero; only cancellation aborts the candidate.
    async fn probe_speed(
        &self,
        client: &reqwest::Client,
        cancel: &CancellationToken,
    ) -> Option<f64> {
        let response = match client
            .get(&self.targets.speed_url)
            .timeout(SPEED_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(_) | Err(_) => return Some(0.0),
        };

        let start = Instant::now();
        let mut bytes_read = 0u64;
        let mut body = response.bytes_stream();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match timeout(SPEED_PROBE_TIMEOUT, body.next()).await {
                Ok(Some(Ok(chunk))) => bytes_read += chunk.len() as u64,
                Ok(Some(Err(_))) | Err(_) => return Some(0.0),
                Ok(None) => break,
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > 0.0 && bytes_read > 0 {
            Some(bytes_read as f64 * 8.0 / (elapsed * 1_000_000.0))
        } else {
            Some(0.0)
        }
    }
}

/// Classify a proxy from the echoed-headers probe body.
///
/// Transparent when the process's public IP appears among the echoed origin
/// addresses (substring match, as the origin list may carry ports), anonymous
/// when several origins or a `Via` header are echoed, elite otherwise.
pub fn classify_anonymity(data: &serde_json::Value, public_ip: Option<&str>) -> Anonymity {
    let headers = data.get("headers").cloned().unwrap_or_default();
    let origin_list = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.as_str())
        .or_else(|| data.get("origin").and_then(|v| v.as_str()))
        .unwrap_or("");
    let origins: Vec<&str> = origin_list.split(',').map(|s| s.trim()).collect();

    if let Some(public_ip) = public_ip {
        if origins.iter().any(|origin| origin.contains(public_ip)) {
            return Anonymity::Transparent;
        }
    }
    if origins.len() > 1 || headers.get("Via").is_some() {
        Anonymity::Anonymous
    } else {
        Anonymity::Elite
    }
}

/// Pre-check is skipped when its cost would dominate; the full probe rejects
/// dead peers anyway.
fn should_skip_precheck(candidate_count: usize) -> bool {
    candidate_count > PRECHECK_SKIP_THRESHOLD
}

/// Throughput is measured only for non-transparent proxies that answered the
/// latency probe within the cutoff.
fn wants_speed_probe(anonymity: Anonymity, latency_secs: f64) -> bool {
    anonymity != Anonymity::Transparent && latency_secs <= SPEED_PROBE_LATENCY_CUTOFF
}

async fn pre_check_all(candidates: Vec<Candidate>) -> Vec<Candidate> {
    stream::iter(candidates.into_iter().map(|candidate| async move {
        if pre_check(&candidate.address).await {
            Some(candidate)
        } else {
            None
        }
    }))
    .buffer_unordered(PRECHECK_CONCURRENCY)
    .filter_map(|survivor| async move { survivor })
    .collect()
    .await
}

/// A candidate passes when the three-way handshake completes in time.
async fn pre_check(address: &str) -> bool {
    matches!(
        timeout(PRECHECK_TIMEOUT, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_elite() {
        let data = json!({"origin": "9.9.9.9", "headers": {}});
        assert_eq!(
            classify_anonymity(&data, Some("1.2.3.4")),
            Anonymity::Elite
        );
    }

    #[test]
    fn test_classify_transparent_from_origin() {
        let data = json!({"origin": "9.9.9.9, 1.2.3.4", "headers": {}});
        assert_eq!(
            classify_anonymity(&data, Some("1.2.3.4")),
            Anonymity::Transparent
        );
    }

    #[test]
    fn test_classify_transparent_from_forwarded_for() {
        let data = json!({
            "origin": "9.9.9.9",
            "headers": {"X-Forwarded-For": "1.2.3.4, 9.9.9.9"}
        });
        assert_eq!(
            classify_anonymity(&data, Some("1.2.3.4")),
            Anonymity::Transparent
        );
    }

    #[test]
    fn test_classify_anonymous_multiple_origins() {
        let data = json!({"origin": "9.9.9.9, 8.8.8.8", "headers": {}});
        assert_eq!(
            classify_anonymity(&data, Some("1.2.3.4")),
            Anonymity::Anonymous
        );
    }

    #[test]
    fn test_classify_anonymous_via_header() {
        let data = json!({"origin": "9.9.9.9", "headers": {"Via": "1.1 squid"}});
        assert_eq!(
            classify_anonymity(&data, Some("1.2.3.4")),
            Anonymity::Anonymous
        );
    }

    #[test]
    fn test_classify_without_public_ip_never_transparent() {
        // Discovery failure degrades detection, not classification.
        let data = json!({"origin": "1.2.3.4", "headers": {}});
        assert_eq!(classify_anonymity(&data, None), Anonymity::Elite);
    }

    #[test]
    fn test_precheck_threshold_boundary() {
        assert!(!should_skip_precheck(10_000));
        assert!(should_skip_precheck(10_001));
    }

    #[test]
    fn test_speed_probe_latency_boundary() {
        assert!(wants_speed_probe(Anonymity::Elite, 7.0));
        assert!(!wants_speed_probe(Anonymity::Elite, 7.000001));
        assert!(!wants_speed_probe(Anonymity::Transparent, 0.1));
    }

    #[tokio::test]
    async fn test_pre_check_rejects_closed_port() {
        // A listener that is immediately dropped leaves a closed port behind.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!pre_check(&addr.to_string()).await);
    }

    #[tokio::test]
    async fn test_pre_check_accepts_open_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        assert!(pre_check(&addr.to_string()).await);
        accept.abort();
    }

    #[tokio::test]
    async fn test_empty_input_emits_finished() {
        let validator = Validator::new(
            ValidationConfig::default(),
            Duration::from_secs(5),
            "en".to_string(),
        );
        let (tx, mut rx) = mpsc::channel(8);
        validator
            .validate(Vec::new(), tx, CancellationToken::new(), LogChannel::new())
            .await;
        assert!(matches!(rx.recv().await, Some(ValidatorEvent::Finished)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_emits_no_marker() {
        let validator = Validator::new(
            ValidationConfig::default(),
            Duration::from_secs(5),
            "en".to_string(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(8);
        validator
            .validate(
                vec![Candidate {
                    address: "192.0.2.1:1080".to_string(),
                    protocol: crate::pool::Protocol::Socks5,
                }],
                tx,
                cancel,
                LogChannel::new(),
            )
            .await;
        // Channel closes without a Finished marker.
        assert!(rx.recv().await.is_none());
    }
}
