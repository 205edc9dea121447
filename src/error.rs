use thiserror::Error;

use crate::storage::StoreError;
use crate::types::{AgentId, ElementId, ElementStatus};

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("Version conflict on element {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: ElementId,
        expected: u64,
        actual: u64,
    },

    #[error("Element {element_id} is owned by {owner:?}, not {caller}")]
    OwnershipMismatch {
        element_id: ElementId,
        owner: Option<AgentId>,
        caller: AgentId,
    },

    #[error("Element not found: {0}")]
    ElementNotFound(ElementId),

    #[error("Element already exists: {0}")]
    ElementExists(ElementId),

    #[error("Invalid transition for element {id}: {from} -> {to}")]
    InvalidTransition {
        id: ElementId,
        from: ElementStatus,
        to: ElementStatus,
    },

    #[error("Gave up on element {id} after {attempts} attempts")]
    RetriesExhausted { id: ElementId, attempts: u32 },

    #[error(transparent)]
    Store(StoreError),
}

impl CancelError {
    /// Errors an outer driver should simply try again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CancelError::VersionConflict { .. } | CancelError::RetriesExhausted { .. }
        )
    }
}

impl From<StoreError> for CancelError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict {
                id,
                expected,
                actual,
            } => CancelError::VersionConflict {
                id,
                expected,
                actual,
            },
            StoreError::NotFound(id) => CancelError::ElementNotFound(id),
            StoreError::AlreadyExists(id) => CancelError::ElementExists(id),
            other => CancelError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CancelError>;
