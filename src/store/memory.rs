// src/store/memory.rs
//! In-process `IngestStore`. Used by the demo binary and the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use super::IngestStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{Ingest, IngestKey, Record, RecordId};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    ingests: HashMap<IngestKey, Ingest>,
    records: BTreeMap<RecordId, Record>,
    links: HashMap<IngestKey, BTreeSet<RecordId>>,
    categories: Vec<String>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(categories: Vec<String>) -> Self {
        Self {
            inner: RwLock::new(State {
                categories,
                ..State::default()
            }),
        }
    }

    /// Number of distinct records held, across all ingests.
    pub fn record_count(&self) -> usize {
        self.inner.read().map(|s| s.records.len()).unwrap_or(0)
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn get_ingest(&self, key: &IngestKey) -> StoreResult<Option<Ingest>> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state.ingests.get(key).cloned())
    }

    async fn create_ingest(&self, ingest: &Ingest) -> StoreResult<()> {
        let mut state = self.inner.write().map_err(poisoned)?;
        if state.ingests.contains_key(&ingest.key) {
            return Err(StoreError::Conflict(ingest.key.to_string()));
        }
        state.ingests.insert(ingest.key.clone(), ingest.clone());
        Ok(())
    }

    async fn update_ingest(&self, ingest: &Ingest) -> StoreResult<()> {
        let mut state = self.inner.write().map_err(poisoned)?;
        match state.ingests.get_mut(&ingest.key) {
            Some(slot) => {
                *slot = ingest.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(ingest.key.to_string())),
        }
    }

    async fn save_records(&self, key: &IngestKey, records: &[Record]) -> StoreResult<usize> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let mut ids = Vec::with_capacity(records.len());
        for r in records {
            let id = r.id();
            state.records.insert(id.clone(), r.detached());
            ids.push(id);
        }
        state.links.entry(key.clone()).or_default().extend(ids);
        Ok(records.len())
    }

    async fn records(&self, key: &IngestKey) -> StoreResult<Vec<Record>> {
        let state = self.inner.read().map_err(poisoned)?;
        let Some(ids) = state.links.get(key) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn category_names(&self, key: &IngestKey) -> StoreResult<Vec<String>> {
        let state = self.inner.read().map_err(poisoned)?;
        let mut names = BTreeSet::new();
        if let Some(ids) = state.links.get(key) {
            for r in ids.iter().filter_map(|id| state.records.get(id)) {
                names.extend(r.categories.iter().cloned());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn all_categories(&self) -> StoreResult<Vec<String>> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state.categories.clone())
    }

    // single write lock: no other writer can land between read and write
    async fn upsert_ingest(
        &self,
        key: &IngestKey,
        now: DateTime<Utc>,
        change: &(dyn for<'c> Fn(&'c mut Ingest) + Send + Sync),
    ) -> StoreResult<Ingest> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let slot = state
            .ingests
            .entry(key.clone())
            .or_insert_with(|| Ingest::new(key.clone(), now));
        change(slot);
        Ok(slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IngestStatus, Source};
    use chrono::Utc;

    #[tokio::test]
    async fn create_then_update_and_conflicts() {
        let store = MemoryStore::new();
        let key = IngestKey::zip("10001", "US");
        let mut ingest = Ingest::new(key.clone(), Utc::now());

        assert!(store.get_ingest(&key).await.unwrap().is_none());
        assert!(matches!(
            store.update_ingest(&ingest).await,
            Err(StoreError::NotFound(_))
        ));

        store.create_ingest(&ingest).await.unwrap();
        assert!(matches!(
            store.create_ingest(&ingest).await,
            Err(StoreError::Conflict(_))
        ));

        ingest.status = IngestStatus::Ready;
        store.update_ingest(&ingest).await.unwrap();
        let back = store.get_ingest(&key).await.unwrap().unwrap();
        assert_eq!(back.status, IngestStatus::Ready);
    }

    #[tokio::test]
    async fn upsert_touches_only_the_callers_fields() {
        let store = MemoryStore::new();
        let key = IngestKey::zip("10001", "US");
        let t0 = Utc::now();

        let created = store
            .upsert_ingest(&key, t0, &|i| i.distance = 5_000)
            .await
            .unwrap();
        assert_eq!(created.status, IngestStatus::New);
        assert_eq!(created.distance, 5_000);

        store
            .upsert_ingest(&key, t0, &|i| i.status = IngestStatus::Ready)
            .await
            .unwrap();
        let back = store.get_ingest(&key).await.unwrap().unwrap();
        assert_eq!(back.status, IngestStatus::Ready);
        assert_eq!(back.distance, 5_000);
    }

    #[tokio::test]
    async fn records_are_shared_between_ingests_and_stripped_of_distance() {
        let store = MemoryStore::new();
        let pizza = IngestKey::term("10001", "US", "pizza");
        let bars = IngestKey::term("10001", "US", "bars");

        let mut r = Record::new("42", Source::YellowPages)
            .named("Joe's")
            .with_category("Pizza");
        r.set_distance(Some(120));

        store.save_records(&pizza, &[r.clone()]).await.unwrap();
        store
            .save_records(&bars, &[r.clone().with_category("Bar")])
            .await
            .unwrap();

        assert_eq!(store.record_count(), 1);
        let from_pizza = store.records(&pizza).await.unwrap();
        assert_eq!(from_pizza.len(), 1);
        assert_eq!(from_pizza[0].distance, None);
        // last write wins on the shared record
        assert_eq!(
            store.category_names(&pizza).await.unwrap(),
            vec!["Bar".to_string(), "Pizza".to_string()]
        );
        assert!(store
            .records(&IngestKey::zip("10001", "US"))
            .await
            .unwrap()
            .is_empty());
    }
}
