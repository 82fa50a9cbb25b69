// tests/metrics_ingest.rs
#![cfg(feature = "strict-metrics")]
use area_aggregator::geo::StaticGeoResolver;
use area_aggregator::ingest::providers::FixtureGateway;
use area_aggregator::metrics::Metrics;
use area_aggregator::model::{LocationSelector, Record, Source};
use area_aggregator::store::MemoryStore;
use area_aggregator::{AggregationService, AggregatorConfig, TermStrategy};
use std::sync::Arc;

#[tokio::test]
async fn metrics_exposed_after_queries() {
    // Install the recorder before anything describes series
    let metrics = Metrics::init().expect("recorder");

    let places = FixtureGateway::new("yp", Source::YellowPages).with_term(
        "*",
        vec![Record::new("1", Source::YellowPages).named("Joe's").at(40.75, -73.99)],
    );
    let service = AggregationService::new(
        &AggregatorConfig::default(),
        Arc::new(MemoryStore::with_categories(vec!["Pizza".into()])),
        Arc::new(StaticGeoResolver::new().with_zip("10001", "US", 40.7506, -73.9972, None, None)),
        Arc::new(places),
        Arc::new(FixtureGateway::new("fb", Source::Facebook)),
        TermStrategy::AllCategories,
    );
    let sel = LocationSelector::zip("10001", "US");
    service.get_places(&sel, 5_000, None, "").await.unwrap();
    service.get_places(&sel, 5_000, None, "").await.unwrap();

    let out = metrics.render();
    for needle in [
        "fetch_calls_total",
        "fetch_merged_records",
        "cache_misses_total",
        "cache_hits_total",
    ] {
        assert!(out.contains(needle), "metrics exposition missing '{needle}'\n{out}");
    }
}
