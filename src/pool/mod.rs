//! Rotating proxy pool
//!
//! Thread-safe store of validated upstream proxies with filtering, per-filter
//! round-robin selection and failure reporting. A single exclusive lock covers
//! the entry list, the per-location index, the rotation indices, the active
//! filter and the currently served entry; callers always receive snapshot
//! clones, never references into the pool.

mod entry;

pub use entry::{score, Anonymity, PoolEntry, Protocol, Status};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Selection criteria installed on the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub region: String,
    pub max_latency_ms: Option<u64>,
}

impl Filter {
    /// The trivial filter: any region, no latency cap.
    pub fn open() -> Self {
        Filter {
            region: "All".to_string(),
            max_latency_ms: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.region == "All" && self.max_latency_ms.is_none()
    }

    pub fn matches(&self, entry: &PoolEntry) -> bool {
        let region_match = self.region == "All" || entry.location == self.region;
        let latency_match = match self.max_latency_ms {
            Some(cap) => entry.latency_ms() <= cap as f64,
            None => true,
        };
        region_match && latency_match
    }

    /// Rotation index key: `<region>_any` or `<region>_lt<ms>`.
    fn index_key(&self) -> String {
        match self.max_latency_ms {
            Some(cap) => format!("{}_lt{}", self.region, cap),
            None => format!("{}_any", self.region),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::open()
    }
}

/// Partial update applied to a single entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryPatch {
    pub latency: Option<f64>,
    pub speed: Option<f64>,
    pub anonymity: Option<Anonymity>,
    pub location: Option<String>,
    pub score: Option<f64>,
    pub status: Option<Status>,
    pub consecutive_failures: Option<u32>,
}

impl EntryPatch {
    /// Patch carrying every measured field of a freshly validated entry.
    pub fn from_validated(entry: &PoolEntry) -> Self {
        EntryPatch {
            latency: Some(entry.latency),
            speed: Some(entry.speed),
            anonymity: Some(entry.anonymity),
            location: Some(entry.location.clone()),
            score: Some(entry.score),
            status: Some(entry.status),
            consecutive_failures: Some(0),
        }
    }
}

#[derive(Default)]
struct PoolState {
    /// Entries in insertion order; the order is the rotation tiebreaker.
    entries: Vec<PoolEntry>,
    /// Location -> addresses, maintained by add/remove/clear.
    by_location: HashMap<String, Vec<String>>,
    /// Per-filter rotation cursor, keyed by `Filter::index_key`.
    rotation: HashMap<String, usize>,
    filter: Filter,
    /// Address of the currently served entry.
    current: Option<String>,
}

/// Thread-safe rotating pool of upstream proxies
#[derive(Default)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new() -> Self {
        ProxyPool::default()
    }

    /// Empty the pool and reset rotation indices, filter state excepted.
    pub fn clear(&self) {
        let mut s = self.state.lock();
        s.entries.clear();
        s.by_location.clear();
        s.rotation.clear();
        s.current = None;
    }

    /// Insert an entry unless its address is already present.
    pub fn add(&self, entry: PoolEntry) {
        let mut s = self.state.lock();
        if s.entries.iter().any(|e| e.address == entry.address) {
            return;
        }
        s.by_location
            .entry(entry.location.clone())
            .or_default()
            .push(entry.address.clone());
        s.entries.push(entry);
    }

    /// Remove the entry with the given address. Returns whether anything was
    /// removed.
    pub fn remove(&self, address: &str) -> bool {
        let mut s = self.state.lock();
        let Some(pos) = s.entries.iter().position(|e| e.address == address) else {
            return false;
        };
        let removed = s.entries.remove(pos);

        if let Some(addresses) = s.by_location.get_mut(&removed.location) {
            addresses.retain(|a| a != address);
            if addresses.is_empty() {
                s.by_location.remove(&removed.location);
            }
        }
        if s.current.as_deref() == Some(address) {
            s.current = None;
        }
        true
    }

    /// Mark an entry unavailable after a gateway-side failure. Idempotent.
    pub fn report_failure(&self, address: &str) {
        let mut s = self.state.lock();
        if let Some(entry) = s.entries.iter_mut().find(|e| e.address == address) {
            entry.status = Status::Unavailable;
        }
    }

    /// Apply a partial field update to one entry.
    pub fn update(&self, address: &str, patch: EntryPatch) -> bool {
        let mut s = self.state.lock();
        let Some(entry) = s.entries.iter_mut().find(|e| e.address == address) else {
            return false;
        };
        if let Some(latency) = patch.latency {
            entry.latency = latency;
        }
        if let Some(speed) = patch.speed {
            entry.speed = speed;
        }
        if let Some(anonymity) = patch.anonymity {
            entry.anonymity = anonymity;
        }
        if let Some(score) = patch.score {
            entry.score = score;
        }
        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(failures) = patch.consecutive_failures {
            entry.consecutive_failures = failures;
        }
        if let Some(location) = patch.location {
            if location != entry.location {
                let old = std::mem::replace(&mut entry.location, location.clone());
                let address = entry.address.clone();
                if let Some(addresses) = s.by_location.get_mut(&old) {
                    addresses.retain(|a| a != &address);
                    if addresses.is_empty() {
                        s.by_location.remove(&old);
                    }
                }
                s.by_location.entry(location).or_default().push(address);
            }
        }
        true
    }

    /// Replace the active filter atomically.
    pub fn set_filter(&self, region: String, max_latency_ms: Option<u64>) {
        let mut s = self.state.lock();
        s.filter = Filter {
            region,
            max_latency_ms,
        };
    }

    pub fn filter(&self) -> Filter {
        self.state.lock().filter.clone()
    }

    /// Rotate to the next working entry under the installed filter.
    ///
    /// When the installed filter is non-trivial and matches nothing, one
    /// retry is made with the open filter; the installed filter stays in
    /// place either way. Returns `None` (and clears `current`) only when the
    /// open retry also comes up empty.
    pub fn next(&self) -> Option<PoolEntry> {
        let mut s = self.state.lock();
        let installed = s.filter.clone();

        if let Some(entry) = Self::rotate(&mut s, &installed) {
            return Some(entry);
        }
        if !installed.is_open() {
            if let Some(entry) = Self::rotate(&mut s, &Filter::open()) {
                return Some(entry);
            }
        }
        s.current = None;
        None
    }

    fn rotate(s: &mut PoolState, filter: &Filter) -> Option<PoolEntry> {
        let mut candidates: Vec<usize> = s
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == Status::Working && filter.matches(e))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // Score descending; the stable sort keeps insertion order as the
        // tiebreaker, so the rotation sequence is deterministic.
        candidates.sort_by(|&a, &b| {
            s.entries[b]
                .score
                .partial_cmp(&s.entries[a].score)
                .unwrap_or(Ordering::Equal)
        });

        let key = filter.index_key();
        let idx = match s.rotation.get(&key) {
            Some(prev) => (prev + 1) % candidates.len(),
            None => 0,
        };
        s.rotation.insert(key, idx);

        let entry = s.entries[candidates[idx]].clone();
        s.current = Some(entry.address.clone());
        Some(entry)
    }

    /// The currently served entry, or `None` once it is no longer working.
    pub fn current(&self) -> Option<PoolEntry> {
        let mut s = self.state.lock();
        let address = s.current.clone()?;
        match s
            .entries
            .iter()
            .find(|e| e.address == address && e.status == Status::Working)
        {
            Some(entry) => Some(entry.clone()),
            None => {
                s.current = None;
                None
            }
        }
    }

    /// Manually pin the served entry; the target must be working.
    pub fn set_current(&self, address: &str) -> Option<PoolEntry> {
        let mut s = self.state.lock();
        let entry = s
            .entries
            .iter()
            .find(|e| e.address == address && e.status == Status::Working)?
            .clone();
        s.current = Some(entry.address.clone());
        Some(entry)
    }

    /// Defensive copy of every entry, for administrative reads and
    /// re-validation.
    pub fn snapshot(&self) -> Vec<PoolEntry> {
        self.state.lock().entries.clone()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|e| e.address == address)
    }

    /// Number of `Working` entries.
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.status == Status::Working)
            .count()
    }

    /// `Working` entries per region, optionally bounded by latency.
    pub fn regions_with_counts(&self, max_latency_ms: Option<u64>) -> HashMap<String, usize> {
        let s = self.state.lock();
        let mut counts = HashMap::new();
        for entry in &s.entries {
            if entry.status != Status::Working {
                continue;
            }
            if let Some(cap) = max_latency_ms {
                if entry.latency_ms() > cap as f64 {
                    continue;
                }
            }
            *counts.entry(entry.location.clone()).or_insert(0) += 1;
        }
        counts
    }
}
