//! Fetch coordination
//!
//! Fans out over the source adapters with bounded concurrency. Each adapter
//! runs at most once per stage, under a per-adapter timeout, with retriable
//! failures retried on an exponential backoff with full jitter. A source
//! that exhausts its budget is recorded and skipped; it never aborts the
//! stage.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::sources::{FetchedItem, SourceAdapter};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Backoff base delay
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff cap
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// One adapter that gave up this run
#[derive(Debug, Clone)]
pub struct AdapterFailure {
    pub source: String,
    pub message: String,
    pub retriable: bool,
}

/// Outcome of a fan-out over all adapters
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Items from every adapter that succeeded, tagged by construction
    pub items: Vec<FetchedItem>,
    /// Adapters that exhausted their retry budget
    pub failed: Vec<AdapterFailure>,
    /// Number of adapters scheduled
    pub attempted: usize,
}

/// Coordinates adapter fan-out
pub struct FetchCoordinator {
    concurrency: usize,
    op_timeout: Duration,
    retries: u32,
}

impl FetchCoordinator {
    pub fn new(concurrency: usize, op_timeout: Duration, retries: u32) -> Self {
        Self {
            concurrency: concurrency.max(1),
            op_timeout,
            retries,
        }
    }

    /// Run every adapter once, bounded by the fetch pool
    pub async fn fetch_all(
        &self,
        adapters: &[Arc<dyn SourceAdapter>],
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> FetchReport {
        info!(
            adapters = adapters.len(),
            concurrency = self.concurrency,
            "Starting source fan-out"
        );

        let outcomes: Vec<_> = stream::iter(adapters.iter().cloned().map(|adapter| {
            let cancel = cancel.clone();
            async move { self.fetch_one(adapter, since, now, &cancel).await }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let mut report = FetchReport {
            attempted: adapters.len(),
            ..FetchReport::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(mut items) => report.items.append(&mut items),
                Err(failure) => report.failed.push(failure),
            }
        }

        info!(
            items = report.items.len(),
            failed = report.failed.len(),
            "Source fan-out complete"
        );
        report
    }

    /// One adapter with timeout and retry discipline
    async fn fetch_one(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<Vec<FetchedItem>, AdapterFailure> {
        let name = adapter.name().to_string();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(AdapterFailure {
                    source: name,
                    message: "cancelled".to_string(),
                    retriable: false,
                });
            }

            let result = match timeout(self.op_timeout, adapter.fetch(since, now)).await {
                Ok(r) => r,
                Err(_) => Err(Error::fetch_retriable(
                    &name,
                    crate::error::FetchErrorKind::Timeout,
                    format!("fetch exceeded {:?}", self.op_timeout),
                )),
            };

            match result {
                Ok(items) => {
                    debug!(source = name.as_str(), count = items.len(), "Adapter done");
                    return Ok(items);
                }
                Err(e) => {
                    let retriable = e.is_retriable();
                    if retriable && attempt < self.retries {
                        let delay = backoff_delay(attempt);
                        warn!(
                            source = name.as_str(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Adapter failed, retrying: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    warn!(source = name.as_str(), "Adapter gave up: {}", e);
                    return Err(AdapterFailure {
                        source: name,
                        message: e.to_string(),
                        retriable,
                    });
                }
            }
        }
    }
}

/// Exponential backoff with full jitter: uniform over `[0, base * 2^attempt]`,
/// capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE
        .checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(BACKOFF_CAP)
        .min(BACKOFF_CAP);
    let max_ms = exp.as_millis().max(1) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
