//! Refresh orchestration
//!
//! A refresh clears the pool, fans out to every configured provider, feeds
//! the merged candidates through the validator and admits the survivors. The
//! auto-refresh loop repeats that on a timer; one cancellation token covers
//! provider fetches, validation and the sleep in between, so shutdown is
//! prompt.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::hub::LogChannel;
use crate::pool::{EntryPatch, ProxyPool};
use crate::provider::{self, Candidate, SourceProvider};
use crate::validator::{public_ip, Validator, ValidatorEvent};

/// Bound on in-flight validation results
const RESULTS_CHANNEL_CAPACITY: usize = 64;

pub struct Refresher {
    pool: Arc<ProxyPool>,
    providers: Vec<Arc<dyn SourceProvider>>,
    validator: Arc<Validator>,
    logs: LogChannel,
}

impl Refresher {
    pub fn new(
        pool: Arc<ProxyPool>,
        providers: Vec<Arc<dyn SourceProvider>>,
        validator: Arc<Validator>,
        logs: LogChannel,
    ) -> Self {
        Refresher {
            pool,
            providers,
            validator,
            logs,
        }
    }

    /// Full refresh cycle. Returns the number of entries admitted.
    pub async fn refresh(&self, cancel: &CancellationToken) -> usize {
        self.pool.clear();
        self.logs.info("refresh started".to_string());

        let candidates =
            provider::collect_candidates(&self.providers, cancel, &self.logs).await;
        if cancel.is_cancelled() {
            self.logs.warn("refresh cancelled while fetching sources".to_string());
            return 0;
        }

        public_ip::init(&self.logs).await;

        let admitted = self.run_validation(candidates, cancel, false).await;
        self.logs
            .info(format!("refresh complete: {} proxies admitted", admitted));
        admitted
    }

    /// Validate a candidate list and admit survivors without clearing the
    /// pool. Entries already present are refreshed in place.
    pub async fn check(&self, candidates: Vec<Candidate>, cancel: &CancellationToken) -> usize {
        public_ip::init(&self.logs).await;
        let admitted = self.run_validation(candidates, cancel, true).await;
        self.logs
            .info(format!("check complete: {} proxies admitted", admitted));
        admitted
    }

    async fn run_validation(
        &self,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
        update_existing: bool,
    ) -> usize {
        let (tx, mut rx) = mpsc::channel(RESULTS_CHANNEL_CAPACITY);
        let validator = self.validator.clone();
        let cancel_child = cancel.clone();
        let logs = self.logs.clone();
        let worker = tokio::spawn(async move {
            validator.validate(candidates, tx, cancel_child, logs).await;
        });

        let mut admitted = 0;
        let mut finished = false;
        while let Some(event) = rx.recv().await {
            match event {
                ValidatorEvent::Entry(entry) => {
                    if update_existing && self.pool.contains(&entry.address) {
                        self.pool
                            .update(&entry.address, EntryPatch::from_validated(&entry));
                    } else {
                        self.pool.add(entry);
                    }
                    admitted += 1;
                }
                ValidatorEvent::Finished => {
                    finished = true;
                    break;
                }
            }
        }
        if !finished {
            // Channel closed without the terminal marker: the run was
            // cancelled upstream.
            self.logs.warn("validation ended without completing".to_string());
        }
        let _ = worker.await;
        admitted
    }

    /// Loop `refresh` on a timer until the token fires.
    pub async fn run_auto_refresh(self: Arc<Self>, interval_minutes: u64, stop: CancellationToken) {
        let interval = Duration::from_secs(interval_minutes * 60);
        info!("auto-refresh every {} minutes", interval_minutes);
        loop {
            self.refresh(&stop).await;
            if stop.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("auto-refresh stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;

    fn test_refresher() -> Refresher {
        let pool = Arc::new(ProxyPool::new());
        let validator = Arc::new(Validator::new(
            ValidationConfig::default(),
            Duration::from_secs(1),
            "en".to_string(),
        ));
        Refresher::new(pool, Vec::new(), validator, LogChannel::new())
    }

    #[tokio::test]
    async fn test_refresh_with_no_providers_admits_nothing() {
        public_ip::pin_for_tests(None);
        let refresher = test_refresher();
        let admitted = refresher.refresh(&CancellationToken::new()).await;
        assert_eq!(admitted, 0);
        assert_eq!(refresher.pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_short_circuits() {
        let refresher = test_refresher();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(refresher.refresh(&cancel).await, 0);
    }
}
