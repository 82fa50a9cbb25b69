// src/ingest/orchestrator.rs
//! Request-time fan-out: one provider call per search term on a bounded pool,
//! each call under its own timeout, results merged and deduplicated.

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::types::ProviderGateway;
use super::{ensure_metrics_described, merge_dedup};
use crate::config::FetchConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::model::Record;

enum CallOutcome {
    Records(Vec<Record>),
    Failed(anyhow::Error),
    TimedOut,
    PoolClosed,
}

/// Shared pool for ad-hoc provider calls. One instance per process; cheap to
/// share behind an `Arc`.
pub struct FetchOrchestrator {
    permits: Arc<Semaphore>,
    per_call_timeout: Duration,
}

impl FetchOrchestrator {
    pub fn new(workers: usize, per_call_timeout: Duration) -> Self {
        ensure_metrics_described();
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            per_call_timeout,
        }
    }

    pub fn from_config(cfg: &FetchConfig) -> Self {
        Self::new(cfg.workers, cfg.per_call_timeout())
    }

    /// Stop accepting work. Calls already holding a slot finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn per_call_timeout(&self) -> Duration {
        self.per_call_timeout
    }

    /// Fetch every term from `gateway` concurrently and merge the results by
    /// (external id, source). Failed or timed-out calls contribute nothing.
    /// Every merged record is stamped with `country_code`.
    pub async fn fetch_merged(
        &self,
        gateway: Arc<dyn ProviderGateway>,
        terms: &[String],
        zip: &str,
        country_code: &str,
        radius_miles: f64,
    ) -> ServiceResult<Vec<Record>> {
        if self.is_closed() {
            return Err(ServiceError::PoolClosed);
        }

        let handles: Vec<(String, JoinHandle<CallOutcome>)> = terms
            .iter()
            .map(|term| {
                let handle = self.spawn_call(gateway.clone(), term.clone(), zip.to_string(), radius_miles);
                (term.clone(), handle)
            })
            .collect();

        let mut batches = Vec::with_capacity(handles.len());
        let mut pool_closed = false;
        for (term, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => CallOutcome::Failed(anyhow::anyhow!("fetch task aborted: {join_err}")),
            };
            match outcome {
                CallOutcome::Records(records) => batches.push(records),
                CallOutcome::Failed(e) => {
                    counter!("fetch_provider_errors_total").increment(1);
                    tracing::warn!(
                        target: "fetch",
                        error = ?e,
                        provider = gateway.name(),
                        %term,
                        %zip,
                        "provider call failed"
                    );
                }
                CallOutcome::TimedOut => {
                    counter!("fetch_timeouts_total").increment(1);
                    tracing::warn!(
                        target: "fetch",
                        provider = gateway.name(),
                        %term,
                        %zip,
                        timeout_ms = self.per_call_timeout.as_millis() as u64,
                        "provider call timed out"
                    );
                }
                CallOutcome::PoolClosed => pool_closed = true,
            }
        }
        if pool_closed {
            return Err(ServiceError::PoolClosed);
        }

        let (mut merged, dups) = merge_dedup(batches);
        for r in merged.iter_mut() {
            r.country_code = Some(country_code.to_string());
        }

        histogram!("fetch_merged_records").record(merged.len() as f64);
        tracing::debug!(
            target: "fetch",
            provider = gateway.name(),
            terms = terms.len(),
            merged = merged.len(),
            dups,
            "fetch batch merged"
        );
        Ok(merged)
    }

    fn spawn_call(
        &self,
        gateway: Arc<dyn ProviderGateway>,
        term: String,
        zip: String,
        radius_miles: f64,
    ) -> JoinHandle<CallOutcome> {
        let permits = self.permits.clone();
        let per_call = self.per_call_timeout;
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return CallOutcome::PoolClosed;
            };
            counter!("fetch_calls_total").increment(1);
            match timeout(per_call, gateway.fetch(&term, &zip, radius_miles)).await {
                Ok(Ok(records)) => CallOutcome::Records(records),
                Ok(Err(e)) => CallOutcome::Failed(e),
                Err(_) => CallOutcome::TimedOut,
            }
        })
    }
}
