use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::engine::retry::RetryPolicy;
use crate::error::{CancelError, Result};
use crate::lifecycle::{ElementEvent, ElementStateMachine};
use crate::storage::{CancellationLedger, ElementStore, StoreError};
use crate::types::{AgentId, Element, ElementId, ElementStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub retry: RetryPolicy,
    /// Queued elements inspected per `claim` call.
    pub claim_batch_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            claim_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged(Element),
    /// The owner acknowledged before; repeated delivery is not an error.
    AlreadyAcknowledged(Element),
}

impl AckOutcome {
    pub fn element(&self) -> &Element {
        match self {
            AckOutcome::Acknowledged(element) | AckOutcome::AlreadyAcknowledged(element) => element,
        }
    }
}

/// Central side of the contract with the agents that execute elements.
#[derive(Clone)]
pub struct AgentProtocol {
    elements: Arc<dyn ElementStore>,
    ledger: Arc<dyn CancellationLedger>,
    config: ProtocolConfig,
}

impl AgentProtocol {
    pub fn new(
        elements: Arc<dyn ElementStore>,
        ledger: Arc<dyn CancellationLedger>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            elements,
            ledger,
            config,
        }
    }

    /// Hands one `Queued` element to `agent_id`, or `None` when nothing is
    /// eligible. Elements of workflows under cancellation are never handed out.
    ///
    /// Candidates are read oldest first in growing pages, so a backlog from a
    /// cancelling workflow cannot hide eligible work behind it.
    pub async fn claim(&self, agent_id: &AgentId) -> Result<Option<Element>> {
        let mut limit = self.config.claim_batch_size.max(1);
        let mut inspected: HashSet<ElementId> = HashSet::new();
        let mut cancelling: HashMap<String, bool> = HashMap::new();

        loop {
            let candidates = self
                .elements
                .query_by_status(ElementStatus::Queued, limit)
                .await?;
            let exhausted = candidates.len() < limit;

            for candidate in candidates {
                if !inspected.insert(candidate.id) {
                    continue;
                }
                if !cancelling.contains_key(&candidate.workflow_name) {
                    let blocked = self
                        .ledger
                        .get_intent(&candidate.workflow_name)
                        .await?
                        .map(|intent| !intent.resolved)
                        .unwrap_or(false);
                    cancelling.insert(candidate.workflow_name.clone(), blocked);
                }
                if cancelling[&candidate.workflow_name] {
                    continue;
                }

                ElementStateMachine::next_status(&candidate, ElementEvent::Claimed)?;
                match self
                    .elements
                    .compare_and_swap_claim(candidate.id, candidate.version, agent_id)
                    .await
                {
                    Ok(claimed) => {
                        log::debug!("Agent {} claimed element {}", agent_id, claimed.id);
                        return Ok(Some(claimed));
                    }
                    // Another agent won this one; try the next candidate.
                    Err(StoreError::VersionConflict { .. }) | Err(StoreError::NotFound(_)) => {
                        continue
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if exhausted {
                return Ok(None);
            }
            limit = limit.saturating_mul(2);
        }
    }

    /// Owned elements the agent must tear down. Safe to call repeatedly.
    pub async fn poll_cancellations(&self, agent_id: &str) -> Result<Vec<Element>> {
        Ok(self
            .elements
            .query_by_owner_and_status(agent_id, ElementStatus::CancelRequested)
            .await?)
    }

    pub async fn acknowledge(&self, element_id: ElementId, agent_id: &str) -> Result<AckOutcome> {
        let (element, changed) = self
            .transition_owned(element_id, agent_id, ElementEvent::CancelAcknowledged)
            .await?;

        if changed {
            log::info!("Agent {} acknowledged cancellation of {}", agent_id, element_id);
            Ok(AckOutcome::Acknowledged(element))
        } else {
            Ok(AckOutcome::AlreadyAcknowledged(element))
        }
    }

    /// Reports normal completion. Fails with `InvalidTransition` once the
    /// element has been moved to `CancelRequested`; the agent must tear down.
    pub async fn complete(
        &self,
        element_id: ElementId,
        agent_id: &str,
        succeeded: bool,
    ) -> Result<Element> {
        let event = if succeeded {
            ElementEvent::Completed
        } else {
            ElementEvent::Failed
        };
        let (element, _) = self.transition_owned(element_id, agent_id, event).await?;
        Ok(element)
    }

    /// CAS loop for transitions only the owning agent may make. Returns the
    /// element and whether this call changed it.
    async fn transition_owned(
        &self,
        element_id: ElementId,
        agent_id: &str,
        event: ElementEvent,
    ) -> Result<(Element, bool)> {
        let target = ElementStateMachine::target_of(event);
        let mut conflicts = 0u32;

        loop {
            let element = self
                .elements
                .get(element_id)
                .await?
                .ok_or(CancelError::ElementNotFound(element_id))?;

            if !element.is_owned_by(agent_id) {
                log::warn!(
                    "Agent {} tried to move element {} owned by {:?}",
                    agent_id,
                    element_id,
                    element.owner_agent_id
                );
                return Err(CancelError::OwnershipMismatch {
                    element_id,
                    owner: element.owner_agent_id,
                    caller: agent_id.to_string(),
                });
            }

            if element.status == target {
                return Ok((element, false));
            }

            let next = ElementStateMachine::next_status(&element, event)?;
            match self
                .elements
                .compare_and_swap_status(element_id, element.version, next)
                .await
            {
                Ok(updated) => return Ok((updated, true)),
                Err(StoreError::VersionConflict { .. }) => {
                    conflicts += 1;
                    if conflicts >= self.config.retry.max_attempts {
                        return Err(CancelError::RetriesExhausted {
                            id: element_id,
                            attempts: conflicts,
                        });
                    }
                    self.config.retry.pause(conflicts).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStore;

    fn create_protocol(store: Arc<InMemoryStore>) -> AgentProtocol {
        AgentProtocol::new(
            store.clone(),
            store,
            ProtocolConfig {
                retry: RetryPolicy::no_backoff(3),
                claim_batch_size: 8,
            },
        )
    }

    async fn seed_cancel_requested(store: &InMemoryStore, owner: &str) -> Element {
        let element = Element::new("wf-1")
            .with_status(ElementStatus::CancelRequested)
            .with_owner(owner);
        store.put(&element).await.unwrap();
        element
    }

    #[tokio::test]
    async fn test_claim_returns_none_when_queue_empty() {
        let store = Arc::new(InMemoryStore::new());
        let protocol = create_protocol(store);

        let claimed = protocol.claim(&"agentA".to_string()).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_claim_sets_owner_and_running() {
        let store = Arc::new(InMemoryStore::new());
        let element = Element::new("wf-1");
        store.put(&element).await.unwrap();
        let protocol = create_protocol(store.clone());

        let claimed = protocol
            .claim(&"agentA".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, element.id);
        assert_eq!(claimed.status, ElementStatus::Running);
        assert!(claimed.is_owned_by("agentA"));

        assert!(protocol.claim(&"agentB".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_skips_workflows_under_cancellation() {
        let store = Arc::new(InMemoryStore::new());
        store.put(&Element::new("wf-cancel")).await.unwrap();
        let keep = Element::new("wf-keep");
        store.put(&keep).await.unwrap();
        store.request_cancellation("wf-cancel", 1).await.unwrap();
        let protocol = create_protocol(store.clone());

        let claimed = protocol
            .claim(&"agentA".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, keep.id);
        assert!(protocol.claim(&"agentA".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_looks_past_cancelling_backlog() {
        let store = Arc::new(InMemoryStore::new());
        for _ in 0..5 {
            store.put(&Element::new("wf-cancel")).await.unwrap();
        }
        let keep = Element::new("wf-keep");
        store.put(&keep).await.unwrap();
        store.request_cancellation("wf-cancel", 5).await.unwrap();
        let protocol = AgentProtocol::new(
            store.clone(),
            store,
            ProtocolConfig {
                retry: RetryPolicy::no_backoff(3),
                claim_batch_size: 2,
            },
        );

        let claimed = protocol
            .claim(&"agentA".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, keep.id);
        assert!(protocol.claim(&"agentA".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acknowledge_by_owner() {
        let store = Arc::new(InMemoryStore::new());
        let element = seed_cancel_requested(&store, "agentA").await;
        let protocol = create_protocol(store.clone());

        let outcome = protocol.acknowledge(element.id, "agentA").await.unwrap();
        assert!(matches!(outcome, AckOutcome::Acknowledged(_)));
        assert_eq!(outcome.element().status, ElementStatus::Canceled);
    }

    #[tokio::test]
    async fn test_second_acknowledge_is_success() {
        let store = Arc::new(InMemoryStore::new());
        let element = seed_cancel_requested(&store, "agentA").await;
        let protocol = create_protocol(store.clone());

        protocol.acknowledge(element.id, "agentA").await.unwrap();
        let again = protocol.acknowledge(element.id, "agentA").await.unwrap();

        assert!(matches!(again, AckOutcome::AlreadyAcknowledged(_)));
        assert_eq!(store.get(element.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_rejects_wrong_agent() {
        let store = Arc::new(InMemoryStore::new());
        let element = seed_cancel_requested(&store, "agentA").await;
        let protocol = create_protocol(store.clone());

        let result = protocol.acknowledge(element.id, "agentB").await;
        assert!(matches!(result, Err(CancelError::OwnershipMismatch { .. })));

        let stored = store.get(element.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ElementStatus::CancelRequested);
        assert_eq!(stored.version, element.version);
    }

    #[tokio::test]
    async fn test_acknowledge_before_cancel_requested_is_invalid() {
        let store = Arc::new(InMemoryStore::new());
        let element = Element::new("wf-1")
            .with_status(ElementStatus::Running)
            .with_owner("agentA");
        store.put(&element).await.unwrap();
        let protocol = create_protocol(store.clone());

        let result = protocol.acknowledge(element.id, "agentA").await;
        assert!(matches!(result, Err(CancelError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_acknowledge_missing_element() {
        let store = Arc::new(InMemoryStore::new());
        let protocol = create_protocol(store);

        let result = protocol.acknowledge(ElementId::new_v4(), "agentA").await;
        assert!(matches!(result, Err(CancelError::ElementNotFound(_))));
    }

    #[tokio::test]
    async fn test_poll_cancellations_only_returns_owned() {
        let store = Arc::new(InMemoryStore::new());
        let mine = seed_cancel_requested(&store, "agentA").await;
        seed_cancel_requested(&store, "agentB").await;
        let protocol = create_protocol(store);

        let pending = protocol.poll_cancellations("agentA").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, mine.id);
    }

    #[tokio::test]
    async fn test_complete_and_race_with_cancellation() {
        let store = Arc::new(InMemoryStore::new());
        let running = Element::new("wf-1")
            .with_status(ElementStatus::Running)
            .with_owner("agentA");
        store.put(&running).await.unwrap();
        let cancelled = seed_cancel_requested(&store, "agentA").await;
        let protocol = create_protocol(store.clone());

        let done = protocol.complete(running.id, "agentA", true).await.unwrap();
        assert_eq!(done.status, ElementStatus::Done);
        let repeated = protocol.complete(running.id, "agentA", true).await.unwrap();
        assert_eq!(repeated.version, done.version);

        let result = protocol.complete(cancelled.id, "agentA", true).await;
        assert!(matches!(
            result,
            Err(CancelError::InvalidTransition {
                from: ElementStatus::CancelRequested,
                ..
            })
        ));
    }
}
