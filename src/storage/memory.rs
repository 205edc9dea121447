use async_trait::async_trait;
use chrono::Utc;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::traits::{CancellationLedger, ElementStore, StoreError, StoreResult};
use crate::types::{AgentId, CancellationIntent, Element, ElementId, ElementStatus, WorkflowName};

#[derive(Clone)]
pub struct InMemoryStore {
    elements: Arc<RwLock<HashMap<ElementId, Element>>>,
    intents: Arc<RwLock<HashMap<WorkflowName, CancellationIntent>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            elements: Arc::new(RwLock::new(HashMap::new())),
            intents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read_elements(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<ElementId, Element>>> {
        self.elements.read().map_err(|_| StoreError::Poisoned)
    }

    fn write_elements(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<ElementId, Element>>> {
        self.elements.write().map_err(|_| StoreError::Poisoned)
    }

    fn read_intents(
        &self,
    ) -> StoreResult<RwLockReadGuard<'_, HashMap<WorkflowName, CancellationIntent>>> {
        self.intents.read().map_err(|_| StoreError::Poisoned)
    }

    fn write_intents(
        &self,
    ) -> StoreResult<RwLockWriteGuard<'_, HashMap<WorkflowName, CancellationIntent>>> {
        self.intents.write().map_err(|_| StoreError::Poisoned)
    }

    fn filter_elements<F>(&self, predicate: F) -> StoreResult<Vec<Element>>
    where
        F: Fn(&Element) -> bool,
    {
        let elements = self.read_elements()?;
        let mut matched: Vec<Element> = elements.values().filter(|e| predicate(e)).cloned().collect();
        matched.sort_by_key(|e| e.last_modified);
        Ok(matched)
    }

    /// Applies `mutate` under the write lock if the stored version matches.
    fn swap<F>(&self, id: ElementId, expected_version: u64, mutate: F) -> StoreResult<Element>
    where
        F: FnOnce(&mut Element),
    {
        let mut elements = self.write_elements()?;
        let element = elements.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if element.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
                actual: element.version,
            });
        }

        mutate(element);
        element.version += 1;
        element.last_modified = Utc::now();
        Ok(element.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ElementStore for InMemoryStore {
    async fn put(&self, element: &Element) -> StoreResult<()> {
        let mut elements = self.write_elements()?;
        match elements.entry(element.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(element.id)),
            Entry::Vacant(slot) => {
                slot.insert(element.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: ElementId) -> StoreResult<Option<Element>> {
        let elements = self.read_elements()?;
        Ok(elements.get(&id).cloned())
    }

    async fn query_by_workflow(&self, workflow_name: &str) -> StoreResult<Vec<Element>> {
        self.filter_elements(|e| e.workflow_name == workflow_name)
    }

    async fn query_by_workflow_and_status(
        &self,
        workflow_name: &str,
        status: ElementStatus,
    ) -> StoreResult<Vec<Element>> {
        self.filter_elements(|e| e.workflow_name == workflow_name && e.status == status)
    }

    async fn query_by_status(
        &self,
        status: ElementStatus,
        limit: usize,
    ) -> StoreResult<Vec<Element>> {
        let mut matched = self.filter_elements(|e| e.status == status)?;
        matched.truncate(limit);
        Ok(matched)
    }

    async fn query_by_owner_and_status(
        &self,
        agent_id: &str,
        status: ElementStatus,
    ) -> StoreResult<Vec<Element>> {
        self.filter_elements(|e| e.status == status && e.is_owned_by(agent_id))
    }

    async fn compare_and_swap_status(
        &self,
        id: ElementId,
        expected_version: u64,
        new_status: ElementStatus,
    ) -> StoreResult<Element> {
        self.swap(id, expected_version, |element| element.status = new_status)
    }

    async fn compare_and_swap_claim(
        &self,
        id: ElementId,
        expected_version: u64,
        agent_id: &AgentId,
    ) -> StoreResult<Element> {
        self.swap(id, expected_version, |element| {
            element.status = ElementStatus::Running;
            element.owner_agent_id = Some(agent_id.clone());
        })
    }
}

#[async_trait]
impl CancellationLedger for InMemoryStore {
    async fn request_cancellation(
        &self,
        workflow_name: &str,
        total_element_count: u64,
    ) -> StoreResult<(CancellationIntent, bool)> {
        let mut intents = self.write_intents()?;
        if let Some(existing) = intents.get(workflow_name) {
            return Ok((existing.clone(), false));
        }

        let intent = CancellationIntent::new(workflow_name, total_element_count);
        intents.insert(workflow_name.to_string(), intent.clone());
        Ok((intent, true))
    }

    async fn get_intent(&self, workflow_name: &str) -> StoreResult<Option<CancellationIntent>> {
        let intents = self.read_intents()?;
        Ok(intents.get(workflow_name).cloned())
    }

    async fn update_progress(
        &self,
        workflow_name: &str,
        acknowledged_count: u64,
    ) -> StoreResult<()> {
        let mut intents = self.write_intents()?;
        if let Some(intent) = intents.get_mut(workflow_name) {
            intent.acknowledged_element_count = acknowledged_count;
        }
        Ok(())
    }

    async fn mark_resolved(&self, workflow_name: &str) -> StoreResult<()> {
        let mut intents = self.write_intents()?;
        if let Some(intent) = intents.get_mut(workflow_name) {
            if !intent.resolved {
                intent.resolved = true;
                intent.resolved_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn reopen(&self, workflow_name: &str) -> StoreResult<()> {
        let mut intents = self.write_intents()?;
        if let Some(intent) = intents.get_mut(workflow_name) {
            intent.resolved = false;
            intent.resolved_at = None;
        }
        Ok(())
    }

    async fn list_unresolved(&self) -> StoreResult<Vec<CancellationIntent>> {
        let intents = self.read_intents()?;
        let mut unresolved: Vec<CancellationIntent> =
            intents.values().filter(|i| !i.resolved).cloned().collect();
        unresolved.sort_by_key(|i| i.requested_at);
        Ok(unresolved)
    }
}
