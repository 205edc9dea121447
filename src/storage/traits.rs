use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AgentId, CancellationIntent, Element, ElementId, ElementStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version conflict on element {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: ElementId,
        expected: u64,
        actual: u64,
    },

    #[error("Element not found: {0}")]
    NotFound(ElementId),

    #[error("Element already exists: {0}")]
    AlreadyExists(ElementId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable keyed storage for work-queue elements.
///
/// `put` only creates. `compare_and_swap_status` and `compare_and_swap_claim`
/// are the only mutations of existing elements; both bump `version` and
/// `last_modified` and fail with [`StoreError::VersionConflict`] when
/// `expected_version` is stale.
#[async_trait]
pub trait ElementStore: Send + Sync {
    /// Fails with [`StoreError::AlreadyExists`] if the id is taken.
    async fn put(&self, element: &Element) -> StoreResult<()>;
    async fn get(&self, id: ElementId) -> StoreResult<Option<Element>>;

    async fn query_by_workflow(&self, workflow_name: &str) -> StoreResult<Vec<Element>>;
    async fn query_by_workflow_and_status(
        &self,
        workflow_name: &str,
        status: ElementStatus,
    ) -> StoreResult<Vec<Element>>;
    async fn query_by_status(&self, status: ElementStatus, limit: usize)
        -> StoreResult<Vec<Element>>;
    async fn query_by_owner_and_status(
        &self,
        agent_id: &str,
        status: ElementStatus,
    ) -> StoreResult<Vec<Element>>;

    async fn compare_and_swap_status(
        &self,
        id: ElementId,
        expected_version: u64,
        new_status: ElementStatus,
    ) -> StoreResult<Element>;

    /// Sets the owner and moves the element to `Running` in one atomic step.
    async fn compare_and_swap_claim(
        &self,
        id: ElementId,
        expected_version: u64,
        agent_id: &AgentId,
    ) -> StoreResult<Element>;
}

/// Durable record of cancellation intents, one per workflow.
#[async_trait]
pub trait CancellationLedger: Send + Sync {
    /// Create-if-absent. The flag is `true` when this call created the record;
    /// an existing record is returned unchanged.
    async fn request_cancellation(
        &self,
        workflow_name: &str,
        total_element_count: u64,
    ) -> StoreResult<(CancellationIntent, bool)>;

    async fn get_intent(&self, workflow_name: &str) -> StoreResult<Option<CancellationIntent>>;
    async fn update_progress(&self, workflow_name: &str, acknowledged_count: u64)
        -> StoreResult<()>;
    async fn mark_resolved(&self, workflow_name: &str) -> StoreResult<()>;
    async fn reopen(&self, workflow_name: &str) -> StoreResult<()>;
    async fn list_unresolved(&self) -> StoreResult<Vec<CancellationIntent>>;
}
