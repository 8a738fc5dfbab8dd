/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::access::{Permission, Role};
use crate::api_error::{ApiError, FailedWrite, FanOutReport};
use crate::hierarchy::{fetch_unit, field, load_tree};
use crate::model::{decode_all, encode, ElementStatus, ResultsPage, Revision};
use crate::runtime_error::RuntimeError;
use crate::store::{new_document_id, Collection, DocumentRef, DocumentStore, Fields};
use crate::subscription::Subscription;
use chrono::DateTime;
use futures::future::join_all;
use futures::stream::{iter, try_unfold, Stream, TryStreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::iter::once;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRevision {
    #[serde(default)]
    pub inspectors: String,
    #[serde(default)]
    pub observations: String,
    pub statuses: BTreeMap<String, ElementStatus>,
}

const UNIT_FIELD: &str = "unidadId";
const CREATED_AT_FIELD: &str = "fecha";

// page tokens are listing positions: "<creation stamp>|<revision id>"
fn validate_token(token: &str) -> Result<&str, ApiError> {
    let malformed = || ApiError::validation(format!("malformed page token \"{token}\""));
    let (created_at, _) = token.split_once('|').ok_or_else(malformed)?;
    DateTime::parse_from_rfc3339(created_at).map_err(|_| malformed())?;

    Ok(token)
}

/// Revisions of the unit, newest first.
pub(crate) async fn load_revisions(store: &dyn DocumentStore, unit_id: &str) -> Result<Vec<Revision>, ApiError> {
    let mut revisions: Vec<Revision> = decode_all(
        Collection::Revisions,
        store
            .query(Collection::Revisions, UNIT_FIELD, &Value::from(unit_id))
            .await?,
    );
    revisions.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| right.id.cmp(&left.id))
    });
    Ok(revisions)
}

/**
Records inspection passes.

A revision is written first and then propagated: every observed element gets its status overwritten and the unit gets
its last-revision stamp. Those sub-writes run concurrently and are not atomic; when some of them fail the revision stays
in place and the caller receives [`ApiError::PartialFailure`] naming what landed and what did not.
 */
pub struct RevisionRecorder {
    store: Arc<dyn DocumentStore>,
}

impl RevisionRecorder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn record_revision(
        &self,
        role: Role,
        unit_id: &str,
        revision: NewRevision,
    ) -> Result<Revision, ApiError> {
        role.ensure(Permission::RecordRevision)?;

        if revision.statuses.is_empty() {
            return Err(ApiError::validation("a revision must observe at least one element"));
        }
        if let Some((element_id, status)) = revision.statuses.iter().find(|(_, status)| !status.is_observed()) {
            return Err(ApiError::validation(format!(
                "element {element_id} cannot be recorded as {status}"
            )));
        }

        if fetch_unit(self.store.as_ref(), unit_id).await?.is_none() {
            return Err(ApiError::not_found(Collection::Units, unit_id));
        }
        let tree = load_tree(self.store.as_ref(), unit_id).await?;
        let members: HashSet<&str> = tree
            .iter()
            .flat_map(|node| node.elements.iter())
            .map(|element| element.id.as_str())
            .collect();
        if let Some(foreign) = revision
            .statuses
            .keys()
            .find(|element_id| !members.contains(element_id.as_str()))
        {
            return Err(ApiError::validation(format!(
                "element {foreign} does not belong to unit {unit_id}"
            )));
        }

        let revision = Revision {
            id: new_document_id(),
            unit_id: unit_id.to_string(),
            inspectors: revision.inspectors.trim().to_string(),
            observations: revision.observations,
            created_at: self.store.server_time().await?,
            statuses: revision.statuses,
        };
        self.store
            .put(Collection::Revisions, &revision.id, encode(&revision)?)
            .await?;

        let report = self.propagate(&revision).await?;
        if report.is_complete() {
            info!(
                unit_id,
                revision_id = revision.id.as_str(),
                elements = revision.statuses.len(),
                "revision recorded"
            );
            Ok(revision)
        } else {
            warn!(
                unit_id,
                revision_id = revision.id.as_str(),
                failed = report.failed.len(),
                "revision recorded with failed updates"
            );
            Err(ApiError::PartialFailure(report))
        }
    }

    async fn propagate(&self, revision: &Revision) -> Result<FanOutReport, RuntimeError> {
        let writes = revision
            .statuses
            .iter()
            .map(|(element_id, status)| {
                Ok((
                    DocumentRef::new(Collection::Elements, element_id.as_str()),
                    Fields::from_iter([field("estado", status)?]),
                ))
            })
            .chain(once(Ok((
                DocumentRef::new(Collection::Units, revision.unit_id.as_str()),
                Fields::from_iter([field("ultima_revision", revision.created_at)?]),
            ))))
            .collect::<Result<Vec<_>, RuntimeError>>()?;

        let results = join_all(
            writes
                .iter()
                .map(|(target, fields)| self.store.update(target.collection, &target.id, fields.clone())),
        )
        .await;

        let mut report = FanOutReport {
            revision_id: revision.id.clone(),
            ..FanOutReport::default()
        };
        for ((target, _), result) in writes.into_iter().zip(results) {
            match result {
                Ok(true) => report.succeeded.push(target),
                Ok(false) => report.failed.push(FailedWrite {
                    target,
                    reason: "document no longer exists".into(),
                }),
                Err(error) => report.failed.push(FailedWrite {
                    target,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(report)
    }

    /// One page of the unit's revisions, newest first. The returned key continues right after the last item.
    pub async fn list_revisions(
        &self,
        role: Role,
        unit_id: &str,
        page_token: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ResultsPage<Revision, String>, ApiError> {
        role.ensure(Permission::ViewFleet)?;

        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ApiError::validation("page size must be positive"));
        }
        let after = page_token.as_deref().map(validate_token).transpose()?;

        let page = self
            .store
            .query_page(
                Collection::Revisions,
                UNIT_FIELD,
                &Value::from(unit_id),
                CREATED_AT_FIELD,
                after,
                page_size,
            )
            .await?;

        Ok(ResultsPage {
            items: decode_all(Collection::Revisions, page.records),
            last_evaluated_key: page.next,
        })
    }

    /// Lazily walks all revisions of the unit, page by page.
    pub fn stream_revisions<'a>(
        &'a self,
        role: Role,
        unit_id: &'a str,
    ) -> Result<impl Stream<Item = Result<Revision, ApiError>> + 'a, ApiError> {
        role.ensure(Permission::ViewFleet)?;

        Ok(try_unfold(Some(None), move |token: Option<Option<String>>| async move {
            let Some(token) = token else {
                return Ok::<_, ApiError>(None);
            };
            let page = self.list_revisions(role, unit_id, token, None).await?;
            Ok(Some((
                iter(page.items.into_iter().map(Ok::<_, ApiError>)),
                page.last_evaluated_key.map(Some),
            )))
        })
        .try_flatten())
    }

    /// Removes the revision. Element statuses stay as they are.
    pub async fn delete_revision(&self, role: Role, revision_id: &str) -> Result<(), ApiError> {
        role.ensure(Permission::DeleteRevision)?;

        self.store.delete(Collection::Revisions, revision_id).await?;

        info!(revision_id, "revision deleted");
        Ok(())
    }

    /// Delivers the unit's revisions, newest first, now and after every change. Must be called within a Tokio runtime.
    pub fn watch_revisions<L>(&self, role: Role, unit_id: &str, listener: L) -> Result<Subscription, ApiError>
    where
        L: Fn(Vec<Revision>) + Send + 'static,
    {
        role.ensure(Permission::ViewFleet)?;

        let unit_id = unit_id.to_string();
        Ok(Subscription::watch(
            Arc::clone(&self.store),
            Collection::Revisions,
            move |store| {
                let unit_id = unit_id.clone();
                async move { load_revisions(store.as_ref(), &unit_id).await }
            },
            listener,
        )?)
    }
}
