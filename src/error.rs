use thiserror::Error;

/// Failures of the ingest store. These are fatal for the request that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ingest not found: {0}")]
    NotFound(String),
    #[error("ingest already exists: {0}")]
    Conflict(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the aggregation entry points. Provider failures never
/// appear here; they degrade to empty results.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("geo resolution failed: {0}")]
    Geo(#[source] anyhow::Error),
    #[error("fetch worker pool is shut down")]
    PoolClosed,
}

pub type ServiceResult<T> = Result<T, ServiceError>;
