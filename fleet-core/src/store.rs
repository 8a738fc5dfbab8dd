/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::runtime_error::RuntimeError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter, Result as FmtResult};
use tokio::sync::broadcast::Receiver;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type Fields = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Units,
    Locations,
    Elements,
    Revisions,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Units => "unidades",
            Self::Locations => "ubicaciones",
            Self::Elements => "elementos",
            Self::Revisions => "revisiones",
        }
    }
}

impl Display for Collection {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub collection: Collection,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl Display for DocumentRef {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}/{}", self.collection, self.id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
}

/// Slice of an ordered query; `next` is the position to continue after, absent on the last page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordsPage {
    pub records: Vec<Record>,
    pub next: Option<String>,
}

/// Listing position of a document: the text of its sort field, then its ID.
pub fn position_of(fields: &Fields, sort_field: &str, id: &str) -> String {
    match fields.get(sort_field) {
        Some(Value::String(value)) => format!("{value}|{id}"),
        Some(Value::Null) | None => format!("|{id}"),
        Some(other) => format!("{other}|{id}"),
    }
}

/// Notification about a written or deleted document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub collection: Collection,
    pub id: String,
}

/**
Document-store client the fleet core runs against.

`update` is a field-level merge: only the given fields are overwritten, so independent flows patching the same
document do not clobber each other. It returns `false` (and writes nothing) when the document does not exist.
 */
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store clock; never goes backwards between calls.
    async fn server_time(&self) -> Result<DateTime<Utc>, RuntimeError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, RuntimeError>;

    async fn put(&self, collection: Collection, id: &str, fields: Fields) -> Result<(), RuntimeError>;

    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<bool, RuntimeError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RuntimeError>;

    /// All documents of the collection whose `field` equals `value`.
    async fn query(&self, collection: Collection, field: &str, value: &Value) -> Result<Vec<Record>, RuntimeError>;

    /**
    Ordered slice of [`DocumentStore::query`]: documents sorted by [`position_of`] for `sort_field`, descending,
    starting right after the `after` position and holding at most `limit` records.
     */
    async fn query_page(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
        sort_field: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<RecordsPage, RuntimeError>;

    async fn list(&self, collection: Collection) -> Result<Vec<Record>, RuntimeError>;

    fn subscribe(&self) -> Receiver<Change>;
}

pub fn new_document_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) const CHANGES_CAPACITY: usize = 256;

pub(crate) struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Strictly increasing, so two stamps taken in sequence always order the same way.
    pub async fn tick(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().await;
        let now = Utc::now();
        let stamp = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = stamp;
        stamp
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{new_document_id, position_of, Collection, DocumentRef, Fields, MonotonicClock};
    use serde_json::json;

    #[tokio::test]
    async fn clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();

        let mut previous = clock.tick().await;
        for _ in 0..100 {
            let next = clock.tick().await;
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn document_ref_display() {
        assert_eq!("ubicaciones/abc", DocumentRef::new(Collection::Locations, "abc").to_string());
    }

    #[test]
    fn document_ids_are_unique() {
        assert_ne!(new_document_id(), new_document_id());
    }

    #[test]
    fn positions() {
        let fields: Fields = json!({"fecha": "2024-03-01T10:00:00.000000000Z", "orden": 3})
            .as_object()
            .cloned()
            .unwrap();

        assert_eq!("2024-03-01T10:00:00.000000000Z|r1", position_of(&fields, "fecha", "r1"));
        assert_eq!("3|r1", position_of(&fields, "orden", "r1"));
        assert_eq!("|r1", position_of(&fields, "missing", "r1"));
    }
}
