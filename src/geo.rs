//! Great-circle distance and the geocoding collaborator contract.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::model::Origin;

pub const METERS_IN_MILE: f64 = 1609.344;
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two points, rounded to whole meters.
pub fn distance_meters(a: (f64, f64), b: (f64, f64)) -> u32 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    (EARTH_RADIUS_METERS * c).round() as u32
}

pub fn distance_from(origin: &Origin, point: (f64, f64)) -> u32 {
    distance_meters((origin.latitude, origin.longitude), point)
}

pub fn meters_to_miles(meters: u32) -> f64 {
    f64::from(meters) / METERS_IN_MILE
}

/// What an IP lookup knows: a postal code + country, or only coordinates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IpLocation {
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl IpLocation {
    pub fn postal_code_and_country(&self) -> Option<(&str, &str)> {
        self.postal_code.as_deref().zip(self.country_code.as_deref())
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Geocoding collaborator.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve_by_zip(&self, zip: &str, country_code: &str) -> Result<Option<Origin>>;
    async fn resolve_by_lat_lon(&self, latitude: f64, longitude: f64) -> Result<Option<Origin>>;
    async fn resolve_by_ip(&self, ip: &str) -> Result<Option<IpLocation>>;
    /// City names served by a zip; used as event search terms.
    async fn cities(&self, zip: &str, country_code: &str) -> Result<Vec<String>>;
    /// IANA time zone name for a zip, e.g. `America/New_York`.
    async fn time_zone(&self, zip: &str) -> Result<Option<String>>;
}

/// Table-driven resolver. Lat/lon lookups return the nearest known zip origin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticGeoResolver {
    #[serde(default)]
    zips: Vec<ZipEntry>,
    #[serde(default)]
    ips: HashMap<String, IpLocation>,
}

#[derive(Debug, Clone, Deserialize)]
struct ZipEntry {
    zip: String,
    country_code: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    time_zone: Option<String>,
}

impl ZipEntry {
    fn origin(&self) -> Origin {
        Origin {
            latitude: self.latitude,
            longitude: self.longitude,
            zip: Some(self.zip.clone()),
            country_code: Some(self.country_code.clone()),
            city: self.city.clone(),
        }
    }
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML table of `[[zips]]` and `[ips."<addr>"]` entries.
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn with_zip(
        mut self,
        zip: &str,
        country_code: &str,
        latitude: f64,
        longitude: f64,
        city: Option<&str>,
        time_zone: Option<&str>,
    ) -> Self {
        self.zips.push(ZipEntry {
            zip: zip.to_string(),
            country_code: country_code.to_string(),
            latitude,
            longitude,
            city: city.map(str::to_string),
            time_zone: time_zone.map(str::to_string),
        });
        self
    }

    pub fn with_ip(mut self, ip: &str, location: IpLocation) -> Self {
        self.ips.insert(ip.to_string(), location);
        self
    }

    fn find(&self, zip: &str, country_code: &str) -> Option<&ZipEntry> {
        self.zips
            .iter()
            .find(|z| z.zip == zip && z.country_code.eq_ignore_ascii_case(country_code))
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn resolve_by_zip(&self, zip: &str, country_code: &str) -> Result<Option<Origin>> {
        Ok(self.find(zip, country_code).map(ZipEntry::origin))
    }

    async fn resolve_by_lat_lon(&self, latitude: f64, longitude: f64) -> Result<Option<Origin>> {
        let nearest = self
            .zips
            .iter()
            .min_by_key(|z| distance_meters((latitude, longitude), (z.latitude, z.longitude)));
        Ok(nearest.map(|z| Origin {
            latitude,
            longitude,
            ..z.origin()
        }))
    }

    async fn resolve_by_ip(&self, ip: &str) -> Result<Option<IpLocation>> {
        Ok(self.ips.get(ip).cloned())
    }

    async fn cities(&self, zip: &str, country_code: &str) -> Result<Vec<String>> {
        Ok(self
            .find(zip, country_code)
            .and_then(|z| z.city.clone())
            .into_iter()
            .collect())
    }

    async fn time_zone(&self, zip: &str) -> Result<Option<String>> {
        Ok(self
            .zips
            .iter()
            .find(|z| z.zip == zip)
            .and_then(|z| z.time_zone.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        // Empire State Building -> Statue of Liberty, roughly 8.3 km
        let d = distance_meters((40.7484, -73.9857), (40.6892, -74.0445));
        assert!((8_000..8_600).contains(&d), "got {d}");
        assert_eq!(distance_meters((40.0, -73.0), (40.0, -73.0)), 0);
    }

    #[tokio::test]
    async fn static_resolver_answers_from_table() {
        let geo = StaticGeoResolver::new()
            .with_zip("10001", "US", 40.7506, -73.9972, Some("New York"), Some("America/New_York"))
            .with_zip("94103", "US", 37.7726, -122.4099, Some("San Francisco"), None);

        let o = geo.resolve_by_zip("10001", "us").await.unwrap().unwrap();
        assert_eq!(o.city.as_deref(), Some("New York"));

        let near = geo.resolve_by_lat_lon(37.77, -122.41).await.unwrap().unwrap();
        assert_eq!(near.zip.as_deref(), Some("94103"));
        assert!((near.latitude - 37.77).abs() < 1e-9);

        assert_eq!(geo.cities("10001", "US").await.unwrap(), vec!["New York"]);
        assert_eq!(
            geo.time_zone("10001").await.unwrap().as_deref(),
            Some("America/New_York")
        );
        assert!(geo.resolve_by_ip("1.2.3.4").await.unwrap().is_none());
    }

    #[test]
    fn parses_toml_table() {
        let geo = StaticGeoResolver::from_toml(
            r#"
[[zips]]
zip = "10001"
country_code = "US"
latitude = 40.7506
longitude = -73.9972
city = "New York"

[ips."10.1.1.1"]
postal_code = "10001"
country_code = "US"
"#,
        )
        .unwrap();
        assert!(geo.find("10001", "US").is_some());
        let ip = geo.ips.get("10.1.1.1").unwrap();
        assert_eq!(ip.postal_code_and_country(), Some(("10001", "US")));
    }
}
