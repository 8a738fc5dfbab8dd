/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

mod access;
mod api_error;
mod blob_store;
mod dynamodb_store;
mod fuel;
mod hierarchy;
mod lambda;
mod memory_store;
mod model;
mod revisions;
mod runtime_error;
mod store;
mod subscription;

pub use lambda_runtime;

pub use crate::access::{Permission, Role};
pub use crate::api_error::{ApiError, FailedWrite, FanOutReport};
pub use crate::blob_store::{BlobStore, MemoryBlobStore, Progress};
pub use crate::dynamodb_store::DynamoDbStore;
pub use crate::fuel::{FuelReading, FuelTracker};
pub use crate::hierarchy::{
    Direction, ElementDraft, HierarchyManager, LocationDraft, NewUnit, SiblingLevel, UnitPatch,
};
pub use crate::lambda::init_tracing;
pub use crate::memory_store::MemoryStore;
pub use crate::model::{
    Element, ElementStatus, FuelLevel, Location, LocationNode, Quantity, ResultsPage, Revision, Unit, UnitAggregate,
    UnitStatus, UnitType,
};
pub use crate::revisions::{NewRevision, RevisionRecorder, DEFAULT_PAGE_SIZE};
pub use crate::runtime_error::RuntimeError;
pub use crate::store::{
    new_document_id, position_of, Change, Collection, DocumentRef, DocumentStore, Fields, Record, RecordsPage,
};
pub use crate::subscription::Subscription;
