// src/service.rs
//! Entry points callers use: places for an area, their categories, events,
//! and the bulk-ingest trigger. Each query resolves a location, consults the
//! freshness policy, then either reads the cache or fans out to providers.

use chrono::Utc;
use chrono_tz::Tz;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AggregatorConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::events::{apply_dates, filter_upcoming, parse_time_zone, sort_events};
use crate::filter::{
    filter_by_categories, filter_by_distance, sort_by_distance, MainCategory,
};
use crate::freshness::FreshnessPolicy;
use crate::geo::{distance_from, meters_to_miles, GeoResolver};
use crate::ingest::orchestrator::FetchOrchestrator;
use crate::ingest::pipeline::{IngestionPipeline, ShutdownReport, TriggerOutcome};
use crate::ingest::types::ProviderGateway;
use crate::ingest::{ensure_metrics_described, normalize_terms, normalize_text};
use crate::model::{IngestKey, LocationSelector, Origin, Record, SelectorKind};
use crate::store::IngestStore;

/// Where search terms for a radius-based place query come from.
#[derive(Clone)]
pub enum TermStrategy {
    /// Names of the places a maps provider reports around the zip.
    NearbyNames(Arc<dyn ProviderGateway>),
    /// Every category known to the store.
    AllCategories,
}

/// A selector narrowed to a zip/country pair plus the point distances are
/// measured from (absent when the zip has no known coordinates).
#[derive(Debug, Clone)]
struct Located {
    zip: String,
    country_code: String,
    origin: Option<Origin>,
}

pub struct AggregationService {
    store: Arc<dyn IngestStore>,
    geo: Arc<dyn GeoResolver>,
    places: Arc<dyn ProviderGateway>,
    events: Arc<dyn ProviderGateway>,
    terms: TermStrategy,
    freshness: FreshnessPolicy,
    orchestrator: Arc<FetchOrchestrator>,
    pipeline: Arc<IngestionPipeline>,
    event_max_distance: u32,
}

impl AggregationService {
    /// `places` serves directory listings (and the bulk pipeline), `events`
    /// serves event searches.
    pub fn new(
        cfg: &AggregatorConfig,
        store: Arc<dyn IngestStore>,
        geo: Arc<dyn GeoResolver>,
        places: Arc<dyn ProviderGateway>,
        events: Arc<dyn ProviderGateway>,
        terms: TermStrategy,
    ) -> Self {
        ensure_metrics_described();
        let pipeline = IngestionPipeline::new(store.clone(), places.clone(), cfg);
        Self {
            store,
            geo,
            places,
            events,
            terms,
            freshness: FreshnessPolicy::new(cfg.cache.freshness_window_days),
            orchestrator: Arc::new(FetchOrchestrator::from_config(&cfg.fetch)),
            pipeline: Arc::new(pipeline),
            event_max_distance: cfg.events.max_distance_meters,
        }
    }

    /// Start the background ingestion tasks.
    pub fn start(&self) {
        self.pipeline.start();
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    /// Close the request pool and stop the ingestion pipeline.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.orchestrator.close();
        self.pipeline.shutdown().await
    }

    // ---- location ----

    async fn locate(&self, selector: &LocationSelector) -> ServiceResult<Option<Located>> {
        match selector.kind() {
            SelectorKind::Zip { zip, country_code } => self.locate_zip(zip, country_code).await.map(Some),
            SelectorKind::LatLon { latitude, longitude } => self.locate_lat_lon(latitude, longitude).await,
            SelectorKind::Ip(ip) => {
                let Some(found) = self.geo.resolve_by_ip(ip).await.map_err(ServiceError::Geo)? else {
                    tracing::debug!(target: "aggregate", %ip, "ip not resolvable");
                    return Ok(None);
                };
                if let Some((zip, country_code)) = found.postal_code_and_country() {
                    return self.locate_zip(zip, country_code).await.map(Some);
                }
                if let Some((latitude, longitude)) = found.coordinates() {
                    return self.locate_lat_lon(latitude, longitude).await;
                }
                Ok(None)
            }
            SelectorKind::Empty => Ok(None),
        }
    }

    async fn locate_zip(&self, zip: &str, country_code: &str) -> ServiceResult<Located> {
        let origin = self
            .geo
            .resolve_by_zip(zip, country_code)
            .await
            .map_err(ServiceError::Geo)?;
        if origin.is_none() {
            tracing::debug!(target: "aggregate", %zip, %country_code, "zip has no known origin");
        }
        Ok(Located {
            zip: zip.to_string(),
            country_code: country_code.to_string(),
            origin,
        })
    }

    async fn locate_lat_lon(&self, latitude: f64, longitude: f64) -> ServiceResult<Option<Located>> {
        let origin = self
            .geo
            .resolve_by_lat_lon(latitude, longitude)
            .await
            .map_err(ServiceError::Geo)?;
        Ok(origin.and_then(|o| {
            let zip = o.zip.clone()?;
            let country_code = o.country_code.clone()?;
            Some(Located {
                zip,
                country_code,
                origin: Some(o),
            })
        }))
    }

    /// Postal code for the selector, resolving coordinates or IP when needed.
    pub async fn get_zip_code(&self, selector: &LocationSelector) -> ServiceResult<Option<String>> {
        if let SelectorKind::Zip { zip, .. } = selector.kind() {
            return Ok(Some(zip.to_string()));
        }
        Ok(self.locate(selector).await?.map(|l| l.zip))
    }

    // ---- places ----

    /// Places within `radius_meters` of the selector, nearest first.
    pub async fn get_places(
        &self,
        selector: &LocationSelector,
        radius_meters: u32,
        main_category: Option<&str>,
        categories: &str,
    ) -> ServiceResult<Vec<Record>> {
        let Some(loc) = self.locate(selector).await? else {
            return Ok(Vec::new());
        };
        let key = IngestKey::zip(&loc.zip, &loc.country_code);
        let records = match self.refresh_if_needed(&loc, radius_meters).await? {
            Some(fetched) => fetched,
            None => self.store.records(&key).await?,
        };

        let mut records = filter_by_distance(with_distances(records, loc.origin.as_ref()), radius_meters);
        records = filter_by_categories(records, categories, false);
        if let Some(main) = MainCategory::parse(main_category) {
            records = main.apply(records);
        }
        sort_by_distance(&mut records);

        tracing::info!(
            target: "aggregate",
            zip = %loc.zip,
            radius_meters,
            returned = records.len(),
            "places query served"
        );
        Ok(records)
    }

    /// Sorted, distinct category names of the places cached for the area.
    pub async fn get_place_categories(
        &self,
        selector: &LocationSelector,
        radius_meters: u32,
        main_category: Option<&str>,
    ) -> ServiceResult<Vec<String>> {
        let Some(loc) = self.locate(selector).await? else {
            return Ok(Vec::new());
        };
        self.refresh_if_needed(&loc, radius_meters).await?;

        let key = IngestKey::zip(&loc.zip, &loc.country_code);
        if self.store.get_ingest(&key).await?.is_none() {
            return Ok(Vec::new());
        }
        let names = self.store.category_names(&key).await?;
        Ok(match MainCategory::parse(main_category) {
            Some(main) => main.apply_to_names(names),
            None => names,
        })
    }

    /// Consult the freshness policy for the zip-level ingest. On a miss, fetch
    /// from the providers and, when anything came back, record the covered
    /// radius and persist. Returns the fetched records on a miss, `None` on a
    /// cache hit.
    async fn refresh_if_needed(&self, loc: &Located, radius_meters: u32) -> ServiceResult<Option<Vec<Record>>> {
        let key = IngestKey::zip(&loc.zip, &loc.country_code);
        let now = Utc::now();
        let ingest = self.store.get_ingest(&key).await?;
        if !self.freshness.needs_refetch(ingest.as_ref(), radius_meters, now) {
            counter!("cache_hits_total").increment(1);
            tracing::debug!(target: "aggregate", %key, radius_meters, "cache hit");
            return Ok(None);
        }
        counter!("cache_misses_total").increment(1);

        let records = self.fetch_places(loc, radius_meters).await?;
        if !records.is_empty() {
            // the bulk pipeline owns `status` on this key and may have moved it
            // while we were fetching; write coverage fields only
            self.store
                .upsert_ingest(&key, now, &|i| {
                    i.distance = radius_meters;
                    i.last_updated = now;
                })
                .await?;
            self.store.save_records(&key, &records).await?;
        }
        Ok(Some(records))
    }

    async fn fetch_places(&self, loc: &Located, radius_meters: u32) -> ServiceResult<Vec<Record>> {
        let radius_miles = meters_to_miles(radius_meters);
        let terms = self.search_terms(loc, radius_miles).await?;
        tracing::info!(
            target: "aggregate",
            zip = %loc.zip,
            terms = terms.len(),
            "getting places from source"
        );
        let started = std::time::Instant::now();
        let records = self
            .orchestrator
            .fetch_merged(self.places.clone(), &terms, &loc.zip, &loc.country_code, radius_miles)
            .await?;
        tracing::info!(
            target: "aggregate",
            zip = %loc.zip,
            requests = terms.len(),
            places = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched places from source"
        );
        Ok(records)
    }

    async fn search_terms(&self, loc: &Located, radius_miles: f64) -> ServiceResult<Vec<String>> {
        match &self.terms {
            TermStrategy::AllCategories => Ok(normalize_terms(self.store.all_categories().await?)),
            TermStrategy::NearbyNames(maps) => {
                let call = maps.fetch("", &loc.zip, radius_miles);
                let nearby = match tokio::time::timeout(self.orchestrator.per_call_timeout(), call).await {
                    Ok(Ok(found)) => found,
                    Ok(Err(e)) => {
                        counter!("fetch_provider_errors_total").increment(1);
                        tracing::warn!(target: "aggregate", error = ?e, provider = maps.name(), zip = %loc.zip, "nearby names lookup failed");
                        Vec::new()
                    }
                    Err(_) => {
                        counter!("fetch_timeouts_total").increment(1);
                        tracing::warn!(target: "aggregate", provider = maps.name(), zip = %loc.zip, "nearby names lookup timed out");
                        Vec::new()
                    }
                };
                Ok(normalize_terms(nearby.into_iter().filter_map(|r| r.name)))
            }
        }
    }

    /// Places for one category or free-text term, served through the ad-hoc
    /// ingestion path. Also kicks off the bulk ingest for the zip.
    pub async fn get_places_for_term(
        &self,
        selector: &LocationSelector,
        term: &str,
        main_category: Option<&str>,
    ) -> ServiceResult<Vec<Record>> {
        let term = normalize_text(term);
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let Some(loc) = self.locate(selector).await? else {
            return Ok(Vec::new());
        };

        let (_, mut records) = self
            .pipeline
            .ingest_by_zip_and_category(&loc.zip, &loc.country_code, &term)
            .await?;
        if let Some(main) = MainCategory::parse(main_category) {
            records = main.apply(records);
        }
        let mut records = with_distances(records, loc.origin.as_ref());
        sort_by_distance(&mut records);

        match self.pipeline.ingest_by_zip(&loc.zip, &loc.country_code).await {
            Ok(outcome) => {
                tracing::debug!(target: "aggregate", zip = %loc.zip, ?outcome, "bulk ingest trigger")
            }
            Err(e) => {
                tracing::warn!(target: "aggregate", error = ?e, zip = %loc.zip, "bulk ingest trigger failed")
            }
        }
        Ok(records)
    }

    /// Fire-and-forget bulk ingest of every category for the zip. Repeated
    /// calls for a zip that is already running or done do nothing.
    pub async fn trigger_bulk_ingest(&self, zip: &str, country_code: &str) -> ServiceResult<TriggerOutcome> {
        Ok(self.pipeline.ingest_by_zip(zip, country_code).await?)
    }

    // ---- events ----

    /// Upcoming events around the selector, soonest first.
    pub async fn get_events(&self, selector: &LocationSelector) -> ServiceResult<Vec<Record>> {
        let Some(loc) = self.locate(selector).await? else {
            return Ok(Vec::new());
        };
        let cities = self
            .geo
            .cities(&loc.zip, &loc.country_code)
            .await
            .map_err(ServiceError::Geo)?;
        let terms = normalize_terms(cities);
        let fetched = self
            .orchestrator
            .fetch_merged(
                self.events.clone(),
                &terms,
                &loc.zip,
                &loc.country_code,
                meters_to_miles(self.event_max_distance),
            )
            .await?;

        let mut zones: HashMap<String, Option<Tz>> = HashMap::new();
        let mut events = Vec::with_capacity(fetched.len());
        for mut e in fetched {
            if let Some(origin) = loc.origin.as_ref() {
                let d = self.event_distance(&e, &loc.country_code, origin).await;
                e.set_distance(d);
            }
            let zone = match e.zip.clone() {
                Some(zip) => self.zone_for(&zip, &mut zones).await,
                None => None,
            };
            apply_dates(&mut e, zone);
            events.push(e);
        }

        let mut events = filter_by_distance(filter_upcoming(events, Utc::now()), self.event_max_distance);
        sort_events(&mut events);
        tracing::info!(
            target: "aggregate",
            zip = %loc.zip,
            cities = terms.len(),
            returned = events.len(),
            "events query served"
        );
        Ok(events)
    }

    /// From the event's own coordinates, else from its zip's origin.
    async fn event_distance(&self, e: &Record, country_code: &str, origin: &Origin) -> Option<u32> {
        if let Some(point) = e.coordinates() {
            return Some(distance_from(origin, point));
        }
        let zip = e.zip.as_deref()?;
        match self.geo.resolve_by_zip(zip, country_code).await {
            Ok(found) => found.map(|o| distance_from(origin, (o.latitude, o.longitude))),
            Err(e) => {
                tracing::warn!(target: "aggregate", error = ?e, %zip, "event zip not resolvable");
                None
            }
        }
    }

    async fn zone_for(&self, zip: &str, cache: &mut HashMap<String, Option<Tz>>) -> Option<Tz> {
        if let Some(z) = cache.get(zip) {
            return *z;
        }
        let zone = match self.geo.time_zone(zip).await {
            Ok(name) => name.as_deref().and_then(parse_time_zone),
            Err(e) => {
                tracing::warn!(target: "aggregate", error = ?e, %zip, "time zone lookup failed");
                None
            }
        };
        cache.insert(zip.to_string(), zone);
        zone
    }
}

/// Set request-scoped distances from `origin`. Records without coordinates,
/// or any record when the origin is unknown, get no distance.
fn with_distances(mut records: Vec<Record>, origin: Option<&Origin>) -> Vec<Record> {
    for r in records.iter_mut() {
        let d = origin.zip(r.coordinates()).map(|(o, p)| distance_from(o, p));
        r.set_distance(d);
    }
    records
}
