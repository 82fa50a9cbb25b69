// tests/fetch_merge.rs
use area_aggregator::error::ServiceError;
use area_aggregator::ingest::orchestrator::FetchOrchestrator;
use area_aggregator::ingest::types::ProviderGateway;
use area_aggregator::model::{Record, Source};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns canned batches per term after an optional per-term delay, and
/// tracks how many calls run at once.
#[derive(Default)]
struct Canned {
    batches: HashMap<String, Vec<Record>>,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Canned {
    fn with(mut self, term: &str, records: Vec<Record>) -> Self {
        self.batches.insert(term.to_string(), records);
        self
    }

    fn delayed(mut self, term: &str, delay: Duration) -> Self {
        self.delays.insert(term.to_string(), delay);
        self
    }
}

#[async_trait]
impl ProviderGateway for Canned {
    async fn fetch(&self, term: &str, _zip: &str, _radius_miles: f64) -> anyhow::Result<Vec<Record>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(d) = self.delays.get(term) {
            tokio::time::sleep(*d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.batches.get(term).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "canned"
    }

    fn source(&self) -> Source {
        Source::Google
    }
}

fn terms(t: &[&str]) -> Vec<String> {
    t.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn same_id_and_source_from_two_terms_collapses_to_one() {
    let gw = Canned::default()
        .with("pizza", vec![Record::new("42", Source::Google).named("Joe's Pizza")])
        .with(
            "sushi",
            vec![
                Record::new("42", Source::Google).named("Joe's Sushi"),
                Record::new("42", Source::YellowPages).named("Joe's (YP)"),
            ],
        )
        // sushi answers first; term order still decides which name survives
        .delayed("pizza", Duration::from_millis(30));

    let orch = FetchOrchestrator::new(8, Duration::from_secs(1));
    let merged = orch
        .fetch_merged(Arc::new(gw), &terms(&["pizza", "sushi"]), "10001", "US", 3.1)
        .await
        .unwrap();

    let google: Vec<_> = merged
        .iter()
        .filter(|r| r.external_id == "42" && r.source == Source::Google)
        .collect();
    assert_eq!(google.len(), 1);
    assert_eq!(google[0].name.as_deref(), Some("Joe's Pizza"));
    // the same id from another source is a different entity
    assert_eq!(merged.len(), 2);
    assert!(merged.iter().all(|r| r.country_code.as_deref() == Some("US")));
}

#[tokio::test]
async fn result_order_is_by_id_then_source() {
    let gw = Canned::default()
        .with("a", vec![Record::new("b", Source::Google), Record::new("a", Source::Facebook)])
        .with("b", vec![Record::new("a", Source::YellowPages), Record::new("c", Source::Unknown)]);
    let orch = FetchOrchestrator::new(4, Duration::from_secs(1));
    let merged = orch
        .fetch_merged(Arc::new(gw), &terms(&["b", "a"]), "10001", "US", 3.1)
        .await
        .unwrap();
    let keys: Vec<_> = merged
        .iter()
        .map(|r| (r.external_id.as_str(), r.source))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("a", Source::YellowPages),
            ("a", Source::Facebook),
            ("b", Source::Google),
            ("c", Source::Unknown),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_call_only_loses_its_own_slot() {
    let gw = Canned::default()
        .with("slow", vec![Record::new("s", Source::Google)])
        .with("fast", vec![Record::new("f", Source::Google)])
        .delayed("slow", Duration::from_secs(30));
    let orch = FetchOrchestrator::new(4, Duration::from_secs(5));
    let merged = orch
        .fetch_merged(Arc::new(gw), &terms(&["slow", "fast"]), "10001", "US", 3.1)
        .await
        .unwrap();
    let ids: Vec<_> = merged.iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["f"]);
}

#[tokio::test]
async fn pool_size_bounds_concurrent_calls() {
    let mut gw = Canned::default();
    let all: Vec<String> = (0..8).map(|i| format!("t{i}")).collect();
    for t in &all {
        gw = gw.delayed(t, Duration::from_millis(20));
    }
    let gw = Arc::new(gw);
    let orch = FetchOrchestrator::new(2, Duration::from_secs(1));
    orch.fetch_merged(gw.clone(), &all, "10001", "US", 3.1)
        .await
        .unwrap();
    assert!(gw.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn closed_pool_fails_the_request() {
    let orch = FetchOrchestrator::new(2, Duration::from_secs(1));
    orch.close();
    let err = orch
        .fetch_merged(Arc::new(Canned::default()), &terms(&["x"]), "10001", "US", 3.1)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PoolClosed));
}
