/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::runtime_error::RuntimeError;
use crate::store::{
    position_of, Change, Collection, DocumentStore, Fields, MonotonicClock, Record, RecordsPage, CHANGES_CAPACITY,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::broadcast::{channel, Receiver, Sender};
use tokio::sync::Mutex;

type Documents = HashMap<Collection, BTreeMap<String, Fields>>;

/// Process-local document store, used for tests and single-node setups.
pub struct MemoryStore {
    documents: Mutex<Documents>,
    faults: Mutex<HashSet<(Collection, String)>>,
    vanishing: Mutex<HashSet<(Collection, String)>>,
    clock: MonotonicClock,
    changes: Sender<Change>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = channel(CHANGES_CAPACITY);

        Self {
            documents: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashSet::new()),
            vanishing: Mutex::new(HashSet::new()),
            clock: MonotonicClock::new(),
            changes,
        }
    }

    /// Makes every following write to the given document fail as if the backend were unreachable.
    pub async fn fail_writes_to(&self, collection: Collection, id: &str) {
        self.faults.lock().await.insert((collection, id.to_string()));
    }

    /// Removes the document right before the next update reaches it, like a concurrent delete would.
    pub async fn delete_before_next_update(&self, collection: Collection, id: &str) {
        self.vanishing.lock().await.insert((collection, id.to_string()));
    }

    async fn check_fault(&self, collection: Collection, id: &str) -> Result<(), RuntimeError> {
        if self.faults.lock().await.contains(&(collection, id.to_string())) {
            Err(RuntimeError::StoreUnavailable(format!("write to {collection}/{id} rejected")))
        } else {
            Ok(())
        }
    }

    fn notify(&self, collection: Collection, id: &str) {
        // no receivers is fine
        let _ = self.changes.send(Change {
            collection,
            id: id.to_string(),
        });
    }
}

fn records_of<'a>(documents: impl Iterator<Item = (&'a String, &'a Fields)>) -> Vec<Record> {
    documents
        .map(|(id, fields)| Record {
            id: id.clone(),
            fields: fields.clone(),
        })
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn server_time(&self) -> Result<DateTime<Utc>, RuntimeError> {
        Ok(self.clock.tick().await)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, RuntimeError> {
        Ok(self
            .documents
            .lock()
            .await
            .get(&collection)
            .and_then(|documents| documents.get(id))
            .map(|fields| Record {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn put(&self, collection: Collection, id: &str, fields: Fields) -> Result<(), RuntimeError> {
        self.check_fault(collection, id).await?;
        self.documents
            .lock()
            .await
            .entry(collection)
            .or_default()
            .insert(id.to_string(), fields);
        self.notify(collection, id);
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<bool, RuntimeError> {
        self.check_fault(collection, id).await?;
        if self.vanishing.lock().await.remove(&(collection, id.to_string())) {
            self.delete(collection, id).await?;
        }

        let updated = match self
            .documents
            .lock()
            .await
            .get_mut(&collection)
            .and_then(|documents| documents.get_mut(id))
        {
            Some(document) => {
                document.extend(fields);
                true
            }
            None => false,
        };

        if updated {
            self.notify(collection, id);
        }
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RuntimeError> {
        self.check_fault(collection, id).await?;
        let removed = self
            .documents
            .lock()
            .await
            .get_mut(&collection)
            .and_then(|documents| documents.remove(id));

        if removed.is_some() {
            self.notify(collection, id);
        }
        Ok(())
    }

    async fn query(&self, collection: Collection, field: &str, value: &Value) -> Result<Vec<Record>, RuntimeError> {
        Ok(self
            .documents
            .lock()
            .await
            .get(&collection)
            .map(|documents| records_of(documents.iter().filter(|(_, fields)| fields.get(field) == Some(value))))
            .unwrap_or_default())
    }

    async fn query_page(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
        sort_field: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<RecordsPage, RuntimeError> {
        let mut positioned: Vec<(String, Record)> = self
            .query(collection, field, value)
            .await?
            .into_iter()
            .map(|record| (position_of(&record.fields, sort_field, &record.id), record))
            .filter(|(position, _)| after.map_or(true, |after| position.as_str() < after))
            .collect();
        positioned.sort_by(|(left, _), (right, _)| right.cmp(left));

        let next = if positioned.len() > limit {
            positioned.truncate(limit);
            positioned.last().map(|(position, _)| position.clone())
        } else {
            None
        };

        Ok(RecordsPage {
            records: positioned.into_iter().map(|(_, record)| record).collect(),
            next,
        })
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Record>, RuntimeError> {
        Ok(self
            .documents
            .lock()
            .await
            .get(&collection)
            .map(|documents| records_of(documents.iter()))
            .unwrap_or_default())
    }

    fn subscribe(&self) -> Receiver<Change> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use crate::memory_store::MemoryStore;
    use crate::runtime_error::RuntimeError;
    use crate::store::{Collection, DocumentStore, Fields};
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn update_merges_fields() -> Result<(), RuntimeError> {
        let store = MemoryStore::new();
        store
            .put(Collection::Units, "u1", fields(json!({"nombre": "Unidad 1", "combustible": ""})))
            .await?;

        assert!(
            store
                .update(Collection::Units, "u1", fields(json!({"combustible": "2/4"})))
                .await?
        );

        let unit = store.get(Collection::Units, "u1").await?.unwrap();
        assert_eq!(Some(&json!("Unidad 1")), unit.fields.get("nombre"));
        assert_eq!(Some(&json!("2/4")), unit.fields.get("combustible"));

        Ok(())
    }

    #[tokio::test]
    async fn update_unexisting() -> Result<(), RuntimeError> {
        let store = MemoryStore::new();

        assert!(
            !store
                .update(Collection::Units, "nope", fields(json!({"combustible": "2/4"})))
                .await?
        );
        assert!(store.get(Collection::Units, "nope").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn query_by_field() -> Result<(), RuntimeError> {
        let store = MemoryStore::new();
        store
            .put(Collection::Locations, "l1", fields(json!({"unidad_id": "u1"})))
            .await?;
        store
            .put(Collection::Locations, "l2", fields(json!({"unidad_id": "u2"})))
            .await?;
        store
            .put(Collection::Locations, "l3", fields(json!({"unidad_id": "u1"})))
            .await?;

        let found = store.query(Collection::Locations, "unidad_id", &json!("u1")).await?;
        let ids: Vec<_> = found.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(vec!["l1", "l3"], ids);
        assert!(store
            .query(Collection::Elements, "unidad_id", &json!("u1"))
            .await?
            .is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn writes_are_announced() -> Result<(), RuntimeError> {
        let store = MemoryStore::new();
        let mut changes = store.subscribe();

        store.put(Collection::Revisions, "r1", Fields::new()).await?;
        store.delete(Collection::Revisions, "r1").await?;
        // deleting a missing document announces nothing
        store.delete(Collection::Revisions, "r1").await?;

        assert_eq!("r1", changes.recv().await.unwrap().id);
        assert_eq!(Collection::Revisions, changes.recv().await.unwrap().collection);
        assert!(changes.try_recv().is_err());

        Ok(())
    }

    #[tokio::test]
    async fn injected_faults_reject_writes() -> Result<(), RuntimeError> {
        let store = MemoryStore::new();
        store.put(Collection::Elements, "e1", Fields::new()).await?;
        store.fail_writes_to(Collection::Elements, "e1").await;

        assert!(matches!(
            store.update(Collection::Elements, "e1", Fields::new()).await,
            Err(RuntimeError::StoreUnavailable(_))
        ));
        assert!(store.get(Collection::Elements, "e1").await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn vanishing_document_misses_update() -> Result<(), RuntimeError> {
        let store = MemoryStore::new();
        store.put(Collection::Elements, "e1", Fields::new()).await?;
        store.delete_before_next_update(Collection::Elements, "e1").await;

        assert!(!store.update(Collection::Elements, "e1", Fields::new()).await?);
        assert!(store.get(Collection::Elements, "e1").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn query_pages_newest_first() -> Result<(), RuntimeError> {
        let store = MemoryStore::new();
        for (id, unit_id, date) in [
            ("r1", "u1", "2024-03-01"),
            ("r2", "u1", "2024-03-03"),
            ("r3", "u2", "2024-03-04"),
            ("r4", "u1", "2024-03-02"),
        ] {
            store
                .put(Collection::Revisions, id, fields(json!({"unidadId": unit_id, "fecha": date})))
                .await?;
        }

        let first = store
            .query_page(Collection::Revisions, "unidadId", &json!("u1"), "fecha", None, 2)
            .await?;
        let ids: Vec<_> = first.records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(vec!["r2", "r4"], ids);
        assert_eq!(Some("2024-03-02|r4".to_string()), first.next);

        let second = store
            .query_page(
                Collection::Revisions,
                "unidadId",
                &json!("u1"),
                "fecha",
                first.next.as_deref(),
                2,
            )
            .await?;
        let ids: Vec<_> = second.records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(vec!["r1"], ids);
        assert!(second.next.is_none());

        Ok(())
    }
}
