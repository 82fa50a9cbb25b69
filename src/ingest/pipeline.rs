// src/ingest/pipeline.rs
//! Bulk per-zip ingestion.
//!
//! `ingest_by_zip` moves a zip-level [`Ingest`] from NEW to IN_PROGRESS and
//! schedules one provider fetch per category on a small bounded pool. Fetch
//! tasks hand their results to a single persistence consumer over a bounded
//! channel; the consumer writes each category's records, and the item that
//! completes the run flips the zip ingest to READY.
//!
//! Completion is counted, not precomputed: each run shares an [`Arc<BulkRun>`]
//! whose counter the consumer decrements once per processed item, whether the
//! fetch or the write for that item failed or not.

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, gauge};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::types::ProviderGateway;
use super::{ensure_metrics_described, merge_dedup};
use crate::config::AggregatorConfig;
use crate::error::StoreResult;
use crate::geo::meters_to_miles;
use crate::model::{Ingest, IngestKey, IngestStatus, Record};
use crate::store::{ensure_ingest, IngestStore};

/// Shared completion state of one bulk run.
#[derive(Debug)]
struct BulkRun {
    zip_key: IngestKey,
    remaining: AtomicUsize,
}

impl BulkRun {
    fn new(zip_key: IngestKey, items: usize) -> Self {
        Self {
            zip_key,
            remaining: AtomicUsize::new(items),
        }
    }

    /// True for exactly one caller: the one that processed the last item.
    fn complete_one(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// One category's fetch result, on its way to the persistence consumer.
#[derive(Debug)]
struct IngestItem {
    key: IngestKey,
    records: Vec<Record>,
    run: Arc<BulkRun>,
}

/// What `ingest_by_zip` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The run started with this many category tasks.
    Scheduled(usize),
    /// The zip was not NEW; nothing was scheduled.
    Skipped(IngestStatus),
    ShuttingDown,
}

/// Which background pools stopped within the shutdown retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub fetch_workers_stopped: bool,
    pub consumer_stopped: bool,
    pub monitor_stopped: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.fetch_workers_stopped && self.consumer_stopped && self.monitor_stopped
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn IngestStore>,
    gateway: Arc<dyn ProviderGateway>,
    radius_miles: f64,
    radius_meters: u32,
    ad_hoc_timeout: Duration,
    monitor_interval: Duration,
    shutdown_attempts: u32,
    shutdown_retry_delay: Duration,

    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    tx: mpsc::Sender<IngestItem>,
    rx: Mutex<Option<mpsc::Receiver<IngestItem>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    trigger_lock: tokio::sync::Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn IngestStore>,
        gateway: Arc<dyn ProviderGateway>,
        cfg: &AggregatorConfig,
    ) -> Self {
        ensure_metrics_described();
        let ingest = &cfg.ingest;
        let (tx, rx) = mpsc::channel(ingest.queue_capacity.max(1));
        Self {
            store,
            gateway,
            radius_miles: meters_to_miles(ingest.radius_meters),
            radius_meters: ingest.radius_meters,
            ad_hoc_timeout: cfg.fetch.per_call_timeout(),
            monitor_interval: ingest.monitor_interval(),
            shutdown_attempts: ingest.shutdown_attempts,
            shutdown_retry_delay: ingest.shutdown_retry_delay(),
            permits: Arc::new(Semaphore::new(ingest.workers.max(1))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            tx,
            rx: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
            monitor: Mutex::new(None),
            trigger_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Spawn the persistence consumer and the queue monitor. Must be called
    /// from within a tokio runtime; calling it twice is a no-op.
    pub fn start(&self) {
        let rx = match self.rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(rx) = rx else {
            tracing::warn!(target: "ingest", "ingestion pipeline already started");
            return;
        };

        let consumer = tokio::spawn(run_consumer(
            self.store.clone(),
            rx,
            self.cancel.clone(),
            self.radius_meters,
        ));
        let monitor = tokio::spawn(run_monitor(
            self.tx.clone(),
            self.cancel.clone(),
            self.monitor_interval,
        ));
        if let Ok(mut slot) = self.consumer.lock() {
            *slot = Some(consumer);
        }
        if let Ok(mut slot) = self.monitor.lock() {
            *slot = Some(monitor);
        }
        tracing::info!(target: "ingest", "ingestion pipeline started");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Items fetched but not yet picked up by the consumer.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Start a bulk ingest for the zip unless one already ran or is running.
    /// The zip ingest is created NEW first when absent.
    pub async fn ingest_by_zip(&self, zip: &str, country_code: &str) -> StoreResult<TriggerOutcome> {
        if self.is_shutting_down() {
            return Ok(TriggerOutcome::ShuttingDown);
        }
        let key = IngestKey::zip(zip, country_code);

        // read-check-update of the status must not interleave
        let _guard = self.trigger_lock.lock().await;
        let ingest = ensure_ingest(self.store.as_ref(), &key, Utc::now()).await?;
        if ingest.status != IngestStatus::New {
            tracing::debug!(target: "ingest", %key, status = ?ingest.status, "bulk ingest skipped");
            return Ok(TriggerOutcome::Skipped(ingest.status));
        }

        let categories = self.store.all_categories().await?;
        if categories.is_empty() {
            let now = Utc::now();
            self.store
                .upsert_ingest(&key, now, &|i| {
                    i.status = IngestStatus::Ready;
                    i.last_updated = now;
                })
                .await?;
            counter!("ingest_completed_total").increment(1);
            tracing::info!(target: "ingest", %key, "no categories; zip marked ready");
            return Ok(TriggerOutcome::Scheduled(0));
        }

        self.store
            .upsert_ingest(&key, Utc::now(), &|i| i.status = IngestStatus::InProgress)
            .await?;
        tracing::info!(target: "ingest", %key, categories = categories.len(), "starting bulk ingest");

        let run = Arc::new(BulkRun::new(key.clone(), categories.len()));
        for category in &categories {
            self.spawn_fetch(IngestKey::term(zip, country_code, category.as_str()), run.clone());
        }
        Ok(TriggerOutcome::Scheduled(categories.len()))
    }

    fn spawn_fetch(&self, key: IngestKey, run: Arc<BulkRun>) {
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        let gateway = self.gateway.clone();
        let tx = self.tx.clone();
        let radius_miles = self.radius_miles;

        self.tracker.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                p = permits.acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => return,
                },
            };

            let records = fetch_category(gateway.as_ref(), &key, radius_miles).await;
            let label = key.to_string();
            let item = IngestItem { key, records, run };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(target: "ingest", key = %label, "shutdown; fetched item dropped");
                }
                sent = tx.send(item) => {
                    if let Err(mpsc::error::SendError(item)) = sent {
                        tracing::warn!(target: "ingest", key = %item.key, "queue closed; fetched item dropped");
                    }
                }
            }
            drop(permit);
        });
    }

    /// Single-category fetch outside the bulk state machine.
    ///
    /// READY sub-entities are served from the store. Otherwise the provider is
    /// called; results are persisted only when the sub-entity is NEW. Status
    /// and `last_updated` are never touched here.
    pub async fn ingest_by_zip_and_category(
        &self,
        zip: &str,
        country_code: &str,
        term: &str,
    ) -> StoreResult<(Ingest, Vec<Record>)> {
        let key = IngestKey::term(zip, country_code, term);
        let ingest = ensure_ingest(self.store.as_ref(), &key, Utc::now()).await?;
        if ingest.status == IngestStatus::Ready {
            let records = self.store.records(&key).await?;
            return Ok((ingest, records));
        }

        let records = match tokio::time::timeout(
            self.ad_hoc_timeout,
            fetch_category(self.gateway.as_ref(), &key, self.radius_miles),
        )
        .await
        {
            Ok(records) => records,
            Err(_) => {
                counter!("fetch_timeouts_total").increment(1);
                tracing::warn!(
                    target: "ingest",
                    provider = self.gateway.name(),
                    %key,
                    "ad-hoc category fetch timed out"
                );
                Vec::new()
            }
        };
        if ingest.status == IngestStatus::New {
            self.store.save_records(&key, &records).await?;
        }
        Ok((ingest, records))
    }

    /// Stop scheduling, signal every background task and wait a bounded number
    /// of rounds for them to exit. In-flight provider calls are not interrupted.
    pub async fn shutdown(&self) -> ShutdownReport {
        tracing::info!(target: "ingest", "shutting down ingestion pipeline");
        self.cancel.cancel();
        self.permits.close();
        self.tracker.close();

        let mut attempt = 1;
        loop {
            let report = self.report();
            if report.is_clean() || attempt > self.shutdown_attempts {
                break;
            }
            attempt += 1;
            tokio::time::sleep(self.shutdown_retry_delay).await;
            tracing::info!(target: "ingest", "waiting for ingestion workers to exit");
        }

        let report = self.report();
        if !report.fetch_workers_stopped {
            tracing::error!(
                target: "ingest",
                pending = self.tracker.len(),
                "failed to shut down ingest fetch workers"
            );
        }
        if !report.consumer_stopped {
            tracing::error!(target: "ingest", "failed to shut down ingest persistence consumer");
            abort_handle(&self.consumer);
        }
        if !report.monitor_stopped {
            tracing::error!(target: "ingest", "failed to shut down ingest queue monitor");
            abort_handle(&self.monitor);
        }
        report
    }

    fn report(&self) -> ShutdownReport {
        ShutdownReport {
            fetch_workers_stopped: self.tracker.is_empty(),
            consumer_stopped: handle_finished(&self.consumer),
            monitor_stopped: handle_finished(&self.monitor),
        }
    }
}

fn handle_finished(slot: &Mutex<Option<JoinHandle<()>>>) -> bool {
    match slot.lock() {
        Ok(slot) => slot.as_ref().map_or(true, JoinHandle::is_finished),
        Err(_) => false,
    }
}

fn abort_handle(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Ok(slot) = slot.lock() {
        if let Some(h) = slot.as_ref() {
            h.abort();
        }
    }
}

/// Call the provider for one category. Errors and panics become an empty list.
async fn fetch_category(
    gateway: &dyn ProviderGateway,
    key: &IngestKey,
    radius_miles: f64,
) -> Vec<Record> {
    let term = key.term.as_deref().unwrap_or_default();
    counter!("fetch_calls_total").increment(1);
    let call = AssertUnwindSafe(gateway.fetch(term, &key.zip, radius_miles)).catch_unwind();
    let records = match call.await {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            counter!("fetch_provider_errors_total").increment(1);
            tracing::warn!(target: "ingest", error = ?e, provider = gateway.name(), %key, "category fetch failed");
            return Vec::new();
        }
        Err(_) => {
            counter!("fetch_provider_errors_total").increment(1);
            tracing::warn!(target: "ingest", provider = gateway.name(), %key, "category fetch panicked");
            return Vec::new();
        }
    };
    let (mut records, _) = merge_dedup([records]);
    for r in records.iter_mut() {
        r.country_code = Some(key.country_code.clone());
    }
    records
}

async fn run_consumer(
    store: Arc<dyn IngestStore>,
    mut rx: mpsc::Receiver<IngestItem>,
    cancel: CancellationToken,
    radius_meters: u32,
) {
    tracing::info!(target: "ingest", "persistence consumer started");
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(item) = item else { break };
        gauge!("ingest_queue_depth").set(rx.len() as f64);
        process_item(store.as_ref(), item, radius_meters).await;
    }
    tracing::info!(target: "ingest", "exiting persistence consumer");
}

async fn process_item(store: &dyn IngestStore, item: IngestItem, radius_meters: u32) {
    let IngestItem { key, records, run } = item;
    match persist_category(store, &key, &records, radius_meters).await {
        Ok(()) => {
            counter!("ingest_items_persisted_total").increment(1);
            tracing::debug!(target: "ingest", %key, records = records.len(), "category persisted");
        }
        Err(e) => {
            counter!("ingest_persist_errors_total").increment(1);
            tracing::error!(target: "ingest", error = ?e, %key, "category persist failed");
        }
    }
    if run.complete_one() {
        finish_run(store, &run.zip_key).await;
    }
}

async fn persist_category(
    store: &dyn IngestStore,
    key: &IngestKey,
    records: &[Record],
    radius_meters: u32,
) -> StoreResult<()> {
    store.save_records(key, records).await?;
    let now = Utc::now();
    store
        .upsert_ingest(key, now, &|i| {
            i.status = IngestStatus::Ready;
            i.distance = radius_meters;
            i.last_updated = now;
        })
        .await?;
    Ok(())
}

async fn finish_run(store: &dyn IngestStore, zip_key: &IngestKey) {
    let result = async {
        if store.get_ingest(zip_key).await?.is_none() {
            return Ok(false);
        }
        let now = Utc::now();
        store
            .upsert_ingest(zip_key, now, &|i| {
                i.status = IngestStatus::Ready;
                i.last_updated = now;
            })
            .await?;
        StoreResult::Ok(true)
    }
    .await;

    match result {
        Ok(true) => {
            counter!("ingest_completed_total").increment(1);
            tracing::info!(target: "ingest", key = %zip_key, "finishing ingest for zip");
        }
        Ok(false) => {
            tracing::warn!(target: "ingest", key = %zip_key, "zip ingest vanished before completion");
        }
        Err(e) => {
            tracing::error!(target: "ingest", error = ?e, key = %zip_key, "failed to mark zip ingest ready");
        }
    }
}

async fn run_monitor(tx: mpsc::Sender<IngestItem>, cancel: CancellationToken, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let depth = tx.max_capacity() - tx.capacity();
                gauge!("ingest_queue_depth").set(depth as f64);
                if depth > 0 {
                    tracing::info!(target: "ingest", depth, "ingest queue size");
                }
            }
        }
    }
    tracing::info!(target: "ingest", "exiting ingest queue monitor");
}
