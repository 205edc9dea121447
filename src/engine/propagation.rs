use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::retry::RetryPolicy;
use crate::error::{CancelError, Result};
use crate::lifecycle::{ElementEvent, ElementStateMachine};
use crate::storage::{ElementStore, StoreError};
use crate::types::{Element, ElementStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    pub retry: RetryPolicy,
    /// Elements of one workflow handled in parallel.
    pub concurrency: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOutcome {
    /// Already absorbing, nothing written.
    Unchanged,
    /// Moved to `CancelRequested`; the owning agent must acknowledge.
    AwaitingAcknowledgment,
    /// Never claimed, so moved all the way to `Canceled`.
    Released,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub workflow_name: String,
    pub examined: usize,
    pub cancel_requested: usize,
    pub released_unclaimed: usize,
    pub unchanged: usize,
}

impl PropagationReport {
    fn new(workflow_name: &str) -> Self {
        Self {
            workflow_name: workflow_name.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: ElementOutcome) {
        self.examined += 1;
        match outcome {
            ElementOutcome::Unchanged => self.unchanged += 1,
            ElementOutcome::AwaitingAcknowledgment => self.cancel_requested += 1,
            ElementOutcome::Released => self.released_unclaimed += 1,
        }
    }

    /// Number of elements this pass actually transitioned.
    pub fn changes(&self) -> usize {
        self.cancel_requested + self.released_unclaimed
    }
}

/// Turns a cancellation intent into per-element transitions.
///
/// Holds no state of its own; every pass re-reads the store, so it can be
/// re-run any number of times for the same workflow.
#[derive(Clone)]
pub struct PropagationEngine {
    elements: Arc<dyn ElementStore>,
    config: PropagationConfig,
}

impl PropagationEngine {
    pub fn new(elements: Arc<dyn ElementStore>, config: PropagationConfig) -> Self {
        Self { elements, config }
    }

    pub async fn propagate(&self, workflow_name: &str) -> Result<PropagationReport> {
        let mut candidates = Vec::new();
        for status in [
            ElementStatus::Queued,
            ElementStatus::Running,
            ElementStatus::CancelRequested,
        ] {
            candidates.extend(
                self.elements
                    .query_by_workflow_and_status(workflow_name, status)
                    .await?,
            );
        }

        let outcomes: Vec<Result<ElementOutcome>> = stream::iter(candidates)
            .map(|element| self.cancel_element(element))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = PropagationReport::new(workflow_name);
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    log::warn!("Cancellation of {} stalled: {}", workflow_name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if report.changes() > 0 {
            log::info!(
                "Propagated cancellation for {}: {} awaiting acknowledgment, {} released unclaimed",
                workflow_name,
                report.cancel_requested,
                report.released_unclaimed
            );
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn cancel_element(&self, element: Element) -> Result<ElementOutcome> {
        let id = element.id;
        let mut current = element;
        let mut requested = false;
        let mut conflicts = 0u32;

        loop {
            let event = match current.status {
                status if status.is_cancellable() => ElementEvent::CancelRequested,
                ElementStatus::CancelRequested if !current.is_claimed() => {
                    ElementEvent::ReleasedUnclaimed
                }
                _ => return Ok(Self::settled_outcome(requested, &current)),
            };
            let target = ElementStateMachine::next_status(&current, event)?;

            match self
                .elements
                .compare_and_swap_status(id, current.version, target)
                .await
            {
                Ok(_) if event == ElementEvent::ReleasedUnclaimed => {
                    log::debug!("Released unclaimed element {}", id);
                    return Ok(ElementOutcome::Released);
                }
                Ok(updated) => {
                    requested = true;
                    current = updated;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    conflicts += 1;
                    if conflicts >= self.config.retry.max_attempts {
                        return Err(CancelError::RetriesExhausted {
                            id,
                            attempts: conflicts,
                        });
                    }
                    self.config.retry.pause(conflicts).await;

                    current = match self.elements.get(id).await? {
                        Some(fresh) => fresh,
                        None => return Ok(ElementOutcome::Unchanged),
                    };
                }
                Err(StoreError::NotFound(_)) => return Ok(ElementOutcome::Unchanged),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Outcome once the loop stops, judged by the latest status read. An
    /// element another writer already moved past `CancelRequested` awaits
    /// nobody.
    fn settled_outcome(requested: bool, current: &Element) -> ElementOutcome {
        if requested && current.status == ElementStatus::CancelRequested {
            ElementOutcome::AwaitingAcknowledgment
        } else {
            ElementOutcome::Unchanged
        }
    }
}
