/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::access::{Permission, Role};
use crate::runtime_error::RuntimeError;
use crate::store::{Collection, DocumentRef};
use std::fmt::{Display, Formatter, Result as FmtResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}.")]
    Validation(String),
    #[error("Document not found - {0}.")]
    NotFound(DocumentRef),
    #[error("Role {role} is not permitted to {permission}.")]
    Permission { role: Role, permission: Permission },
    #[error("{0}")]
    PartialFailure(FanOutReport),
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[from] RuntimeError),
}

impl ApiError {
    pub(crate) fn not_found(collection: Collection, id: &str) -> Self {
        Self::NotFound(DocumentRef::new(collection, id))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Transport and store failures may succeed when issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(error) if error.is_transient())
    }
}

#[derive(Debug, PartialEq)]
#[doc = "Sub-write of a fan-out that did not land."]
pub struct FailedWrite {
    pub target: DocumentRef,
    pub reason: String,
}

/// Outcome of propagating a revision: the revision document itself is always written when a report exists.
#[derive(Debug, Default, PartialEq)]
pub struct FanOutReport {
    pub revision_id: String,
    pub succeeded: Vec<DocumentRef>,
    pub failed: Vec<FailedWrite>,
}

impl FanOutReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Display for FanOutReport {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(
            formatter,
            "Revision {} recorded, but {} of {} updates failed:",
            self.revision_id,
            self.failed.len(),
            self.total()
        )?;
        for failure in &self.failed {
            write!(formatter, " {} ({});", failure.target, failure.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::access::{Permission, Role};
    use crate::api_error::{ApiError, FailedWrite, FanOutReport};
    use crate::runtime_error::RuntimeError;
    use crate::store::{Collection, DocumentRef};

    #[test]
    fn partial_failure_message_names_failed_documents() {
        let error = ApiError::PartialFailure(FanOutReport {
            revision_id: "r1".into(),
            succeeded: vec![DocumentRef::new(Collection::Elements, "e1")],
            failed: vec![FailedWrite {
                target: DocumentRef::new(Collection::Elements, "e2"),
                reason: "gone".into(),
            }],
        });

        assert_eq!(
            "Revision r1 recorded, but 1 of 2 updates failed: elementos/e2 (gone);",
            error.to_string()
        );
        assert!(!error.is_retryable());
    }

    #[test]
    fn permission_message() {
        let error = ApiError::Permission {
            role: Role::Guardia,
            permission: Permission::DeleteRevision,
        };

        assert_eq!("Role guardia is not permitted to delete revisions.", error.to_string());
    }

    #[test]
    fn backend_errors_are_retryable() {
        let error = ApiError::from(RuntimeError::StoreUnavailable("timeout".into()));

        assert!(error.is_retryable());
        assert_eq!(
            "Backend unavailable: Document store unavailable: timeout.",
            error.to_string()
        );
    }

    #[test]
    fn unreadable_documents_are_not_retryable() {
        let error = ApiError::from(RuntimeError::MalformedDocument("item without documentId".into()));

        assert!(!error.is_retryable());
    }
}
