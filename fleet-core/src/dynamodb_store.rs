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
use aws_config::load_from_env;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::query::builders::QueryFluentBuilder;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::types::AttributeValue::S;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_dynamo::{from_item, to_attribute_value, to_item};
use serde_json::Value;
use std::collections::HashMap;
use std::env::var;
use tokio::sync::broadcast::{channel, Receiver, Sender};
use tracing::{info_span, warn, Instrument, Span};

const HASH_KEY: &str = "collectionName";
const RANGE_KEY: &str = "documentId";
const OWNER_INDEX: &str = "owner-index";
const OWNER_KEY: &str = "ownerKey";
const OWNER_ORDER: &str = "ownerOrder";
const CLOCK_COLLECTION: &str = "_clock";
const CLOCK_ID: &str = "serverTime";
const CLOCK_ATTEMPTS: usize = 5;

type Item = HashMap<String, AttributeValue>;

/// How a child collection is indexed by its owner: owner reference field and the field it is listed by.
struct Ownership {
    owner_field: &'static str,
    sort_field: Option<&'static str>,
}

fn ownership(collection: Collection) -> Option<Ownership> {
    match collection {
        Collection::Units => None,
        Collection::Locations => Some(Ownership {
            owner_field: "unidad_id",
            sort_field: None,
        }),
        Collection::Elements => Some(Ownership {
            owner_field: "ubicacion_id",
            sort_field: None,
        }),
        Collection::Revisions => Some(Ownership {
            owner_field: "unidadId",
            sort_field: Some("fecha"),
        }),
    }
}

fn owner_key(collection: Collection, owner: &Value) -> String {
    match owner {
        Value::String(owner) => format!("{collection}#{owner}"),
        other => format!("{collection}#{other}"),
    }
}

fn owner_order(ownership: &Ownership, fields: &Fields, id: &str) -> String {
    ownership
        .sort_field
        .map_or_else(|| id.to_string(), |sort_field| position_of(fields, sort_field, id))
}

fn max_items(limit: usize) -> i32 {
    i32::try_from(limit).unwrap_or(i32::MAX)
}

/**
All collections share one table: the collection name is the hash key and the document ID the range key.

Child documents (locations, elements, revisions) are also projected into the `owner-index` global secondary index:
`ownerKey` holds `<collection>#<owner id>` and `ownerOrder` the listing position within the owner, so per-owner reads
and pages never touch documents of other owners.

Required environment variables:
<dl>
    <dt><code>FLEET_TABLE</code></dt>
    <dd>Name of DynamoDB fleet table.</dd>
</dl>
 */
pub struct DynamoDbStore {
    client: Box<Client>,
    table_name: String,
    clock: MonotonicClock,
    changes: Sender<Change>,
}

impl DynamoDbStore {
    pub async fn load_from_env() -> Result<Self, RuntimeError> {
        let config = &load_from_env().await;

        var("FLEET_TABLE")
            .map(|table_name| {
                let client = Client::new(config);
                Self::new(client, table_name)
            })
            .map_err(RuntimeError::ClientConfigLoadingError)
    }

    pub fn new(client: Client, table_name: String) -> Self {
        let (changes, _) = channel(CHANGES_CAPACITY);

        Self {
            client: Box::new(client),
            table_name,
            clock: MonotonicClock::new(),
            changes,
        }
    }

    fn notify(&self, collection: Collection, id: &str) {
        let _ = self.changes.send(Change {
            collection,
            id: id.to_string(),
        });
    }

    /// Runs the query page after page until the results are exhausted or `limit` records are collected.
    async fn collect_pages(
        &self,
        query: impl Fn(Option<Item>) -> QueryFluentBuilder,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, RuntimeError> {
        let mut records = vec![];
        let mut start_key: Option<Item> = None;
        loop {
            let page = query(start_key.take())
                .send()
                .instrument(self.instrumentation())
                .await?;

            for item in page.items.unwrap_or_default() {
                records.push(record_of(item)?);
            }
            if limit.map_or(false, |limit| records.len() >= limit) {
                break;
            }

            match page.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn scan_collection(&self, collection: Collection, filter: Option<(&str, &Value)>) -> Result<Vec<Record>, RuntimeError> {
        let mut names = HashMap::from([("#collection".to_string(), HASH_KEY.to_string())]);
        let mut values = HashMap::from([(":collection".to_string(), S(collection.name().into()))]);
        let mut filter_expression = None;

        if let Some((field, value)) = filter {
            names.insert("#field".into(), field.into());
            values.insert(":value".into(), to_attribute_value(value)?);
            filter_expression = Some("#field = :value".to_string());
        }

        self.collect_pages(
            |start_key| {
                self.client
                    .query()
                    .table_name(self.table_name.as_str())
                    .key_condition_expression("#collection = :collection")
                    .set_filter_expression(filter_expression.clone())
                    .set_expression_attribute_names(Some(names.clone()))
                    .set_expression_attribute_values(Some(values.clone()))
                    .set_exclusive_start_key(start_key)
            },
            None,
        )
        .await
    }

    /// Reads the owner's documents from the index, newest position first, only those before `after`.
    async fn query_owner(
        &self,
        collection: Collection,
        owner: &Value,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, RuntimeError> {
        let mut values = HashMap::from([(":owner".to_string(), S(owner_key(collection, owner)))]);
        let mut condition = "#owner = :owner".to_string();
        if let Some(after) = after {
            values.insert(":after".into(), S(after.into()));
            condition.push_str(" AND #order < :after");
        }
        let mut names = HashMap::from([("#owner".to_string(), OWNER_KEY.to_string())]);
        if after.is_some() {
            names.insert("#order".into(), OWNER_ORDER.into());
        }

        self.collect_pages(
            |start_key| {
                self.client
                    .query()
                    .table_name(self.table_name.as_str())
                    .index_name(OWNER_INDEX)
                    .key_condition_expression(condition.as_str())
                    .set_expression_attribute_names(Some(names.clone()))
                    .set_expression_attribute_values(Some(values.clone()))
                    .scan_index_forward(false)
                    .set_limit(limit.map(max_items))
                    .set_exclusive_start_key(start_key)
            },
            limit,
        )
        .await
    }

    async fn last_stamp(&self) -> Result<Option<DateTime<Utc>>, RuntimeError> {
        let item = self
            .client
            .get_item()
            .table_name(self.table_name.as_str())
            .key(HASH_KEY, S(CLOCK_COLLECTION.into()))
            .key(RANGE_KEY, S(CLOCK_ID.into()))
            .consistent_read(true)
            .send()
            .instrument(self.instrumentation())
            .await?
            .item;

        match item.as_ref().and_then(|item| item.get("stamp")) {
            Some(S(stamp)) => DateTime::parse_from_rfc3339(stamp)
                .map(|stamp| Some(stamp.with_timezone(&Utc)))
                .map_err(|error| RuntimeError::MalformedDocument(format!("server clock stamp: {error}"))),
            _ => Ok(None),
        }
    }

    fn instrumentation(&self) -> Span {
        info_span!(
            "dynamodb",
            region = self.client.conf().region().map(|value| value.to_string()).as_deref(),
            table = self.table_name.as_str(),
        )
    }
}

fn record_of(item: Item) -> Result<Record, RuntimeError> {
    let mut fields: Fields = from_item(item)?;
    for key in [HASH_KEY, OWNER_KEY, OWNER_ORDER] {
        fields.remove(key);
    }

    match fields.remove(RANGE_KEY) {
        Some(Value::String(id)) => Ok(Record { id, fields }),
        _ => Err(RuntimeError::MalformedDocument(format!("item without {RANGE_KEY}"))),
    }
}

#[async_trait]
impl DocumentStore for DynamoDbStore {
    /// Table-wide clock: every stamp is stored conditionally, so no instance hands out one older than the last.
    async fn server_time(&self) -> Result<DateTime<Utc>, RuntimeError> {
        let mut candidate = self.clock.tick().await;

        for _ in 0..CLOCK_ATTEMPTS {
            let result = self
                .client
                .update_item()
                .table_name(self.table_name.as_str())
                .key(HASH_KEY, S(CLOCK_COLLECTION.into()))
                .key(RANGE_KEY, S(CLOCK_ID.into()))
                .update_expression("SET #stamp = :stamp")
                .condition_expression("attribute_not_exists(#stamp) OR #stamp < :stamp")
                .expression_attribute_names("#stamp", "stamp")
                .expression_attribute_values(":stamp", S(candidate.to_rfc3339_opts(SecondsFormat::Nanos, true)))
                .send()
                .instrument(self.instrumentation())
                .await;

            match result {
                Ok(_) => return Ok(candidate),
                Err(SdkError::ServiceError(error)) if error.err().is_conditional_check_failed_exception() => {
                    let local = self.clock.tick().await;
                    candidate = match self.last_stamp().await? {
                        Some(last) if last >= local => last + Duration::microseconds(1),
                        _ => local,
                    };
                }
                Err(error) => return Err(error.into()),
            }
        }

        warn!(attempts = CLOCK_ATTEMPTS, "server clock contention");
        Err(RuntimeError::StoreUnavailable("server clock contention".into()))
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, RuntimeError> {
        self.client
            .get_item()
            .table_name(self.table_name.as_str())
            .key(HASH_KEY, S(collection.name().into()))
            .key(RANGE_KEY, S(id.into()))
            .send()
            .instrument(self.instrumentation())
            .await?
            .item
            .map(record_of)
            .transpose()
    }

    async fn put(&self, collection: Collection, id: &str, fields: Fields) -> Result<(), RuntimeError> {
        let index = ownership(collection).and_then(|ownership| {
            fields.get(ownership.owner_field).map(|owner| {
                (
                    owner_key(collection, owner),
                    owner_order(&ownership, &fields, id),
                )
            })
        });

        let mut request = self
            .client
            .put_item()
            .table_name(self.table_name.as_str())
            .set_item(Some(to_item(fields)?))
            .item(HASH_KEY, S(collection.name().into()))
            .item(RANGE_KEY, S(id.into()));
        if let Some((key, order)) = index {
            request = request.item(OWNER_KEY, S(key)).item(OWNER_ORDER, S(order));
        }
        request.send().instrument(self.instrumentation()).await?;

        self.notify(collection, id);
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<bool, RuntimeError> {
        if fields.is_empty() {
            return Ok(self.get(collection, id).await?.is_some());
        }

        // patched owner or sort fields move the document within the index
        let mut index_updates = vec![];
        if let Some(ownership) = ownership(collection) {
            if let Some(owner) = fields.get(ownership.owner_field) {
                index_updates.push((OWNER_KEY, owner_key(collection, owner)));
            }
            if ownership
                .sort_field
                .map_or(false, |sort_field| fields.contains_key(sort_field))
            {
                index_updates.push((OWNER_ORDER, owner_order(&ownership, &fields, id)));
            }
        }

        let mut assignments = Vec::with_capacity(fields.len() + index_updates.len());
        let mut request = self
            .client
            .update_item()
            .table_name(self.table_name.as_str())
            .key(HASH_KEY, S(collection.name().into()))
            .key(RANGE_KEY, S(id.into()))
            .condition_expression(format!("attribute_exists({RANGE_KEY})"));
        for (index, (name, value)) in fields.into_iter().enumerate() {
            assignments.push(format!("#f{index} = :v{index}"));
            request = request
                .expression_attribute_names(format!("#f{index}"), name)
                .expression_attribute_values(format!(":v{index}"), to_attribute_value(value)?);
        }
        for (index, (name, value)) in index_updates.into_iter().enumerate() {
            assignments.push(format!("#i{index} = :i{index}"));
            request = request
                .expression_attribute_names(format!("#i{index}"), name)
                .expression_attribute_values(format!(":i{index}"), S(value));
        }

        match request
            .update_expression(format!("SET {}", assignments.join(", ")))
            .send()
            .instrument(self.instrumentation())
            .await
        {
            Ok(_) => {
                self.notify(collection, id);
                Ok(true)
            }
            Err(SdkError::ServiceError(error)) if error.err().is_conditional_check_failed_exception() => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RuntimeError> {
        self.client
            .delete_item()
            .table_name(self.table_name.as_str())
            .key(HASH_KEY, S(collection.name().into()))
            .key(RANGE_KEY, S(id.into()))
            .send()
            .instrument(self.instrumentation())
            .await?;

        self.notify(collection, id);
        Ok(())
    }

    async fn query(&self, collection: Collection, field: &str, value: &Value) -> Result<Vec<Record>, RuntimeError> {
        match ownership(collection) {
            Some(ownership) if ownership.owner_field == field => self.query_owner(collection, value, None, None).await,
            _ => self.scan_collection(collection, Some((field, value))).await,
        }
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
        match ownership(collection) {
            Some(Ownership {
                owner_field,
                sort_field: Some(indexed),
            }) if owner_field == field && indexed == sort_field => {}
            _ => {
                return Err(RuntimeError::UnsupportedQuery(format!(
                    "{collection} is not indexed by {field} and {sort_field}"
                )))
            }
        }

        // one extra record tells whether another page exists
        let mut records = self.query_owner(collection, value, after, Some(limit + 1)).await?;
        let next = if records.len() > limit {
            records.truncate(limit);
            records
                .last()
                .map(|record| position_of(&record.fields, sort_field, &record.id))
        } else {
            None
        };

        Ok(RecordsPage { records, next })
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Record>, RuntimeError> {
        self.scan_collection(collection, None).await
    }

    fn subscribe(&self) -> Receiver<Change> {
        self.changes.subscribe()
    }
}
