//! # Domain model
//! Records (places and events), their provider source, the resolved origin
//! point, and the `Ingest` cache-control entity.
//!
//! Distances on a [`Record`] are request-scoped: they are recomputed on every
//! query and never serialized or persisted.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::geo::METERS_IN_MILE;

/// Provider a record came from. The declaration order is the dedup tie-break
/// order (external id first, then source).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    #[default]
    #[serde(rename = "NONE")]
    Unknown,
    YellowPages,
    Google,
    Facebook,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Unknown => "NONE",
            Source::YellowPages => "YELLOW_PAGES",
            Source::Google => "GOOGLE",
            Source::Facebook => "FACEBOOK",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup identity of a record: same external id from different sources are
/// different entities.
pub type RecordId = (String, Source);

/// Raw event time strings, passed through from the provider as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// A place or an event, normalized to one shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub external_id: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Present on events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<EventSchedule>,

    /// Meters from the request origin.
    #[serde(skip_deserializing)]
    pub distance: Option<u32>,
    #[serde(skip_deserializing)]
    pub distance_in_miles: Option<f64>,
    #[serde(skip)]
    pub starts_at: Option<DateTime<FixedOffset>>,
    #[serde(skip)]
    pub ends_at: Option<DateTime<FixedOffset>>,
}

impl Record {
    pub fn new(external_id: impl Into<String>, source: Source) -> Self {
        Self {
            external_id: external_id.into(),
            source,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    pub fn in_zip(mut self, zip: impl Into<String>) -> Self {
        self.zip = Some(zip.into());
        self
    }

    pub fn scheduled(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.schedule = Some(EventSchedule {
            start_time: start.map(str::to_string),
            end_time: end.map(str::to_string),
        });
        self
    }

    pub fn id(&self) -> RecordId {
        (self.external_id.clone(), self.source)
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// Sets the distance in meters together with its miles equivalent.
    pub fn set_distance(&mut self, meters: Option<u32>) {
        self.distance = meters;
        self.distance_in_miles = meters.map(|m| f64::from(m) / METERS_IN_MILE);
    }

    /// Copy without any request-scoped state, as it should be persisted.
    pub fn detached(&self) -> Self {
        Self {
            distance: None,
            distance_in_miles: None,
            starts_at: None,
            ends_at: None,
            ..self.clone()
        }
    }

    /// Category names joined for substring matching.
    pub fn categories_joined(&self) -> String {
        self.categories
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A resolved geographic reference point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl Origin {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Self::default()
        }
    }

    pub fn with_zip(mut self, zip: impl Into<String>, country_code: impl Into<String>) -> Self {
        self.zip = Some(zip.into());
        self.country_code = Some(country_code.into());
        self
    }
}

/// What the caller supplied to locate the request. Resolution priority is
/// zip+country, then lat/lon, then client IP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationSelector {
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// The selector narrowed to the branch that wins.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorKind<'a> {
    Zip { zip: &'a str, country_code: &'a str },
    LatLon { latitude: f64, longitude: f64 },
    Ip(&'a str),
    Empty,
}

impl LocationSelector {
    pub fn zip(zip: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            zip: Some(zip.into()),
            country_code: Some(country_code.into()),
            ..Self::default()
        }
    }

    pub fn lat_lon(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Self::default()
        }
    }

    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> SelectorKind<'_> {
        fn present(s: &Option<String>) -> Option<&str> {
            s.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }

        if let (Some(zip), Some(country_code)) = (present(&self.zip), present(&self.country_code))
        {
            return SelectorKind::Zip { zip, country_code };
        }
        if let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) {
            return SelectorKind::LatLon {
                latitude,
                longitude,
            };
        }
        if let Some(ip) = present(&self.ip) {
            return SelectorKind::Ip(ip);
        }
        SelectorKind::Empty
    }
}

/// Cache key: zip + country, optionally narrowed to one category or term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IngestKey {
    pub zip: String,
    pub country_code: String,
    pub term: Option<String>,
}

impl IngestKey {
    pub fn zip(zip: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            zip: zip.into(),
            country_code: country_code.into(),
            term: None,
        }
    }

    pub fn term(
        zip: impl Into<String>,
        country_code: impl Into<String>,
        term: impl Into<String>,
    ) -> Self {
        Self {
            term: Some(term.into()),
            ..Self::zip(zip, country_code)
        }
    }

    /// The zip-level key this key belongs to.
    pub fn zip_level(&self) -> Self {
        Self::zip(self.zip.clone(), self.country_code.clone())
    }
}

impl fmt::Display for IngestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.term {
            Some(term) => write!(f, "{}/{}/{}", self.country_code, self.zip, term),
            None => write!(f, "{}/{}", self.country_code, self.zip),
        }
    }
}

/// Bulk-ingest state of an `Ingest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStatus {
    #[default]
    New,
    InProgress,
    Ready,
}

/// Cache-control entity. The associated records live in the store, keyed by
/// the same `IngestKey`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingest {
    pub key: IngestKey,
    pub status: IngestStatus,
    /// Radius in meters the cached set is known to cover.
    pub distance: u32,
    pub last_updated: DateTime<Utc>,
}

impl Ingest {
    pub fn new(key: IngestKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: IngestStatus::New,
            distance: 0,
            last_updated: now,
        }
    }

    pub fn with_distance(mut self, distance: u32) -> Self {
        self.distance = distance;
        self
    }
}
