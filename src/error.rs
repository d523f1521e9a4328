//! Error taxonomy surfaced to callers of the coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::model::{DocumentId, Version};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("document already open: {0}")]
    AlreadyOpen(DocumentId),

    #[error("document not open: {0}")]
    NotOpen(DocumentId),

    #[error("document closed while waiting for analysis: {0}")]
    DocumentClosed(DocumentId),

    #[error("timed out after {waited:?} waiting for analysis of {id} at {min_version} or later")]
    Timeout {
        id: DocumentId,
        min_version: Version,
        waited: Duration,
    },

    #[error("wait for analysis of {0} was cancelled")]
    Cancelled(DocumentId),

    #[error("analysis coordinator is shut down")]
    Shutdown,
}

pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;
