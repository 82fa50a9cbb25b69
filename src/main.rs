//! Demo entrypoint: wires the aggregation service against fixture providers,
//! a static geo table and the in-memory store, answers one places query and
//! shuts the engine down.
//!
//! Usage: `area-aggregator <zip> <country> [radius_meters] [categories]`

use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use area_aggregator::geo::StaticGeoResolver;
use area_aggregator::ingest::config::load_categories_default;
use area_aggregator::ingest::providers::FixtureGateway;
use area_aggregator::metrics::Metrics;
use area_aggregator::store::MemoryStore;
use area_aggregator::{AggregationService, AggregatorConfig, LocationSelector, Source, TermStrategy};

const ENV_GEO_PATH: &str = "GEO_TABLE_PATH";
const DEFAULT_GEO_PATH: &str = "config/geo.toml";
const ENV_FIXTURES_DIR: &str = "FIXTURES_DIR";
const DEFAULT_FIXTURES_DIR: &str = "config/fixtures";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("area_aggregator=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn load_geo(path: &Path) -> anyhow::Result<StaticGeoResolver> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no geo table; every location resolves to nothing");
        return Ok(StaticGeoResolver::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading geo table from {}", path.display()))?;
    StaticGeoResolver::from_toml(&content)
}

fn load_fixture(dir: &Path, file: &str, name: &'static str, source: Source) -> anyhow::Result<FixtureGateway> {
    let path = dir.join(file);
    if path.exists() {
        FixtureGateway::from_path(name, source, &path)
    } else {
        tracing::warn!(path = %path.display(), provider = name, "fixture missing; provider returns nothing");
        Ok(FixtureGateway::new(name, source))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();
    let metrics = Metrics::init()?;

    let mut args = std::env::args().skip(1);
    let zip = args.next().ok_or_else(|| anyhow!("usage: area-aggregator <zip> <country> [radius_meters] [categories]"))?;
    let country = args.next().ok_or_else(|| anyhow!("missing <country>"))?;
    let radius: u32 = match args.next() {
        Some(r) => r.parse().with_context(|| format!("bad radius {r:?}"))?,
        None => 5_000,
    };
    let categories = args.next().unwrap_or_default();

    let cfg = AggregatorConfig::load_default()?;
    let seed = load_categories_default()?;
    tracing::info!(categories = seed.len(), "category seed loaded");

    let fixtures = env_path(ENV_FIXTURES_DIR, DEFAULT_FIXTURES_DIR);
    let places = Arc::new(load_fixture(&fixtures, "places.json", "yellow-pages", Source::YellowPages)?);
    let events = Arc::new(load_fixture(&fixtures, "events.json", "facebook", Source::Facebook)?);
    let nearby = Arc::new(load_fixture(&fixtures, "nearby.json", "google", Source::Google)?);
    let geo = Arc::new(load_geo(&env_path(ENV_GEO_PATH, DEFAULT_GEO_PATH))?);
    let store = Arc::new(MemoryStore::with_categories(seed));

    let service = AggregationService::new(
        &cfg,
        store.clone(),
        geo,
        places,
        events,
        TermStrategy::NearbyNames(nearby),
    );
    service.start();

    let selector = LocationSelector::zip(&zip, &country);
    let found = service.get_places(&selector, radius, None, &categories).await?;
    println!("{}", serde_json::to_string_pretty(&found)?);

    let outcome = service.trigger_bulk_ingest(&zip, &country).await?;
    tracing::info!(?outcome, "bulk ingest triggered");
    let upcoming = service.get_events(&selector).await?;
    tracing::info!(events = upcoming.len(), "events fetched");

    let report = service.shutdown().await;
    tracing::info!(clean = report.is_clean(), records = store.record_count(), "engine stopped");
    tracing::debug!(metrics = %metrics.render(), "final metrics");
    Ok(())
}
