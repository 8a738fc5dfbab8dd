/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use std::env::VarError;
use std::error::Error;
use std::fmt::Debug;
use thiserror::Error;
use tokio::runtime::TryCurrentError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to load client configuration: {0}.")]
    ClientConfigLoadingError(VarError),
    #[error("DynamoDB request failed: {0}.")]
    DynamoDb(String),
    #[error("Failed to (de)serialize DynamoDB item: {0}.")]
    Serialization(#[from] serde_dynamo::Error),
    #[error("Failed to map document: {0}.")]
    Json(#[from] serde_json::Error),
    #[error("Malformed document: {0}.")]
    MalformedDocument(String),
    #[error("Document store unavailable: {0}.")]
    StoreUnavailable(String),
    #[error("Query not supported by the store: {0}.")]
    UnsupportedQuery(String),
    #[error("Subscriptions need a running Tokio runtime: {0}.")]
    NoRuntime(#[from] TryCurrentError),
}

impl RuntimeError {
    /// Failures of the transport or the backend itself; a broken document or setup fails the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DynamoDb(_) | Self::StoreUnavailable(_))
    }
}

impl<E, R> From<SdkError<E, R>> for RuntimeError
where
    E: Error + 'static,
    R: Debug,
{
    fn from(error: SdkError<E, R>) -> Self {
        Self::DynamoDb(format!("{}", DisplayErrorContext(&error)))
    }
}
