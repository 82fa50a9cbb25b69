//! Ingest store contract: ingests keyed by [`IngestKey`] plus the records
//! associated with each of them (many-to-many).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::model::{Ingest, IngestKey, Record};

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait IngestStore: Send + Sync {
    async fn get_ingest(&self, key: &IngestKey) -> StoreResult<Option<Ingest>>;
    /// Fails with `Conflict` if the key already exists.
    async fn create_ingest(&self, ingest: &Ingest) -> StoreResult<()>;
    /// Fails with `NotFound` if the key does not exist.
    async fn update_ingest(&self, ingest: &Ingest) -> StoreResult<()>;
    /// Upsert records by (external id, source) and associate them with `key`.
    /// Existing associations are kept. Returns the number of records written.
    async fn save_records(&self, key: &IngestKey, records: &[Record]) -> StoreResult<usize>;
    /// Records associated with `key`, in (external id, source) order.
    async fn records(&self, key: &IngestKey) -> StoreResult<Vec<Record>>;
    /// Sorted, deduplicated category names over the records of `key`.
    async fn category_names(&self, key: &IngestKey) -> StoreResult<Vec<String>>;
    /// The full category list driving bulk ingestion, in stored order.
    async fn all_categories(&self) -> StoreResult<Vec<String>>;

    /// Apply `change` to the latest stored copy of `key`, or to a NEW ingest
    /// when there is none, and write it back. Returns what was stored.
    ///
    /// Callers touch only the fields they own, so concurrent writers on the
    /// same key do not undo each other's fields. The default goes through
    /// get/create/update; a create that loses a race becomes an update.
    async fn upsert_ingest(
        &self,
        key: &IngestKey,
        now: DateTime<Utc>,
        change: &(dyn for<'c> Fn(&'c mut Ingest) + Send + Sync),
    ) -> StoreResult<Ingest> {
        if let Some(mut current) = self.get_ingest(key).await? {
            change(&mut current);
            self.update_ingest(&current).await?;
            return Ok(current);
        }
        let mut fresh = Ingest::new(key.clone(), now);
        change(&mut fresh);
        match self.create_ingest(&fresh).await {
            Ok(()) => Ok(fresh),
            Err(StoreError::Conflict(_)) => {
                let mut current = self
                    .get_ingest(key)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
                change(&mut current);
                self.update_ingest(&current).await?;
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }
}

/// Fetch the ingest for `key`, creating it as NEW when absent. Someone else
/// creating it first is not an error; their copy is returned.
pub async fn ensure_ingest(
    store: &dyn IngestStore,
    key: &IngestKey,
    now: DateTime<Utc>,
) -> StoreResult<Ingest> {
    if let Some(existing) = store.get_ingest(key).await? {
        return Ok(existing);
    }
    let fresh = Ingest::new(key.clone(), now);
    match store.create_ingest(&fresh).await {
        Ok(()) => Ok(fresh),
        Err(StoreError::Conflict(_)) => store
            .get_ingest(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string())),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IngestStatus;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Hides the key from the first lookup, as if another writer created it
    /// right after we looked.
    struct LateCreate {
        inner: MemoryStore,
        hidden: AtomicBool,
    }

    impl LateCreate {
        async fn seeded(key: &IngestKey, status: IngestStatus) -> Self {
            let inner = MemoryStore::new();
            let mut ingest = Ingest::new(key.clone(), Utc::now()).with_distance(7_000);
            ingest.status = status;
            inner.create_ingest(&ingest).await.unwrap();
            Self {
                inner,
                hidden: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl IngestStore for LateCreate {
        async fn get_ingest(&self, key: &IngestKey) -> StoreResult<Option<Ingest>> {
            if self.hidden.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_ingest(key).await
        }
        async fn create_ingest(&self, ingest: &Ingest) -> StoreResult<()> {
            self.inner.create_ingest(ingest).await
        }
        async fn update_ingest(&self, ingest: &Ingest) -> StoreResult<()> {
            self.inner.update_ingest(ingest).await
        }
        async fn save_records(&self, key: &IngestKey, records: &[Record]) -> StoreResult<usize> {
            self.inner.save_records(key, records).await
        }
        async fn records(&self, key: &IngestKey) -> StoreResult<Vec<Record>> {
            self.inner.records(key).await
        }
        async fn category_names(&self, key: &IngestKey) -> StoreResult<Vec<String>> {
            self.inner.category_names(key).await
        }
        async fn all_categories(&self) -> StoreResult<Vec<String>> {
            self.inner.all_categories().await
        }
    }

    #[tokio::test]
    async fn ensure_returns_the_winners_copy_after_a_lost_create() {
        let key = IngestKey::zip("10001", "US");
        let store = LateCreate::seeded(&key, IngestStatus::InProgress).await;
        let got = ensure_ingest(&store, &key, Utc::now()).await.unwrap();
        assert_eq!(got.status, IngestStatus::InProgress);
    }

    #[tokio::test]
    async fn default_upsert_turns_a_lost_create_into_an_update() {
        let key = IngestKey::zip("10001", "US");
        let store = LateCreate::seeded(&key, IngestStatus::Ready).await;
        let got = store
            .upsert_ingest(&key, Utc::now(), &|i| i.distance = 9_000)
            .await
            .unwrap();
        assert_eq!(got.status, IngestStatus::Ready);
        assert_eq!(got.distance, 9_000);
        let back = store.inner.get_ingest(&key).await.unwrap().unwrap();
        assert_eq!(back.distance, 9_000);
        assert_eq!(back.status, IngestStatus::Ready);
    }
}
