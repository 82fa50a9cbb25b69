// src/ingest/types.rs
use anyhow::Result;

use crate::model::{Record, Source};

/// One external data provider. Implementations may fail or hang; callers
/// bound every call with a timeout and treat failures as "no records".
#[async_trait::async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn fetch(&self, term: &str, zip: &str, radius_miles: f64) -> Result<Vec<Record>>;
    fn name(&self) -> &'static str;
    fn source(&self) -> Source;
}
