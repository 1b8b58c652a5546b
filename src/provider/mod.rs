//! Candidate sources
//!
//! A provider produces raw `host:port` candidates tagged by protocol. Source
//! failures (timeouts, parse errors, bad credentials) never propagate; a
//! provider that cannot deliver simply contributes nothing. The refresh
//! orchestrator merges and dedups across providers before validation.

mod engines;
mod subscription;

pub use engines::{FofaProvider, HunterProvider, QuakeProvider};
pub use subscription::SubscriptionProvider;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::hub::LogChannel;
use crate::pool::Protocol;

/// Provider HTTP fetch budget
pub const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Concurrent fetches across all of one provider's sources
pub const FETCH_CONCURRENCY: usize = 50;

/// A raw `(address, protocol)` pair awaiting validation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub address: String,
    pub protocol: Protocol,
}

/// Produces candidate addresses per protocol.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Gather candidates. Must not fail; error paths return empty sets.
    async fn produce(&self, logs: &LogChannel) -> HashMap<Protocol, HashSet<String>>;
}

/// Fan out to every provider, merge per protocol, and flatten to a deduped
/// candidate list.
pub async fn collect_candidates(
    providers: &[Arc<dyn SourceProvider>],
    cancel: &CancellationToken,
    logs: &LogChannel,
) -> Vec<Candidate> {
    let fetches = providers.iter().map(|provider| {
        let provider = provider.clone();
        let logs = logs.clone();
        async move { provider.produce(&logs).await }
    });

    let produced = tokio::select! {
        _ = cancel.cancelled() => return Vec::new(),
        produced = join_all(fetches) => produced,
    };

    let mut merged: HashMap<Protocol, HashSet<String>> = HashMap::new();
    for sets in produced {
        for (protocol, addresses) in sets {
            merged.entry(protocol).or_default().extend(addresses);
        }
    }

    let mut candidates = Vec::new();
    for (protocol, addresses) in merged {
        for address in addresses {
            candidates.push(Candidate { address, protocol });
        }
    }
    logs.info(format!("collected {} raw candidates", candidates.len()));
    candidates
}
