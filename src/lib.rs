// src/lib.rs
//! Place and event aggregation: resolve an area, serve cached listings while
//! they are fresh, otherwise fan out to the providers, merge, persist and
//! return nearest-first. A background pipeline bulk-ingests every category
//! for a zip.

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod freshness;
pub mod geo;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod service;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::AggregatorConfig;
pub use crate::error::{ServiceError, ServiceResult, StoreError, StoreResult};
pub use crate::freshness::FreshnessPolicy;
pub use crate::ingest::orchestrator::FetchOrchestrator;
pub use crate::ingest::pipeline::{IngestionPipeline, ShutdownReport, TriggerOutcome};
pub use crate::ingest::types::ProviderGateway;
pub use crate::model::{Ingest, IngestKey, IngestStatus, LocationSelector, Origin, Record, Source};
pub use crate::service::{AggregationService, TermStrategy};
