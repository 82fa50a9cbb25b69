// src/config/mod.rs
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";
pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
/// A century; longer windows mean "never refetch" anyway.
pub const MAX_FRESHNESS_WINDOW_DAYS: i64 = 36_500;

fn default_freshness_window_days() -> i64 {
    30
}
fn default_fetch_workers() -> usize {
    60
}
fn default_per_call_timeout_ms() -> u64 {
    5_000
}
fn default_ingest_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    1_024
}
fn default_radius_meters() -> u32 {
    40_000
}
fn default_monitor_interval_secs() -> u64 {
    10
}
fn default_shutdown_attempts() -> u32 {
    5
}
fn default_shutdown_retry_delay_ms() -> u64 {
    1_000
}
fn default_event_distance_meters() -> u32 {
    // 50 miles
    80_467
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub ingest: IngestConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age after which a cached ingest is refetched regardless of radius.
    #[serde(default = "default_freshness_window_days")]
    pub freshness_window_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_window_days: default_freshness_window_days(),
        }
    }
}

/// Ad-hoc fan-out pool used by request-time fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_workers")]
    pub workers: usize,
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
}

impl FetchConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_fetch_workers(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
        }
    }
}

/// Bulk ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Radius passed to the provider for per-category fetches.
    #[serde(default = "default_radius_meters")]
    pub radius_meters: u32,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_shutdown_attempts")]
    pub shutdown_attempts: u32,
    #[serde(default = "default_shutdown_retry_delay_ms")]
    pub shutdown_retry_delay_ms: u64,
}

impl IngestConfig {
    /// Never zero; tokio intervals reject a zero period.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn shutdown_retry_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_retry_delay_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_ingest_workers(),
            queue_capacity: default_queue_capacity(),
            radius_meters: default_radius_meters(),
            monitor_interval_secs: default_monitor_interval_secs(),
            shutdown_attempts: default_shutdown_attempts(),
            shutdown_retry_delay_ms: default_shutdown_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_distance_meters")]
    pub max_distance_meters: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_distance_meters: default_event_distance_meters(),
        }
    }
}

impl AggregatorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: AggregatorConfig = toml::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// $AGGREGATOR_CONFIG_PATH, then config/aggregator.toml, then defaults.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from_file(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from_file(&default_p);
        }
        Ok(Self::default())
    }

    // Pools of size zero would never make progress; out-of-range periods are
    // clamped into what the runtime and chrono accept.
    fn sanitize(&mut self) {
        if self.fetch.workers == 0 {
            self.fetch.workers = default_fetch_workers();
        }
        if self.ingest.workers == 0 {
            self.ingest.workers = default_ingest_workers();
        }
        if self.ingest.queue_capacity == 0 {
            self.ingest.queue_capacity = default_queue_capacity();
        }
        self.cache.freshness_window_days = self
            .cache
            .freshness_window_days
            .clamp(0, MAX_FRESHNESS_WINDOW_DAYS);
        if self.ingest.monitor_interval_secs == 0 {
            self.ingest.monitor_interval_secs = 1;
        }
    }
}
