use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::propagation::{PropagationEngine, PropagationReport};
use crate::error::Result;
use crate::storage::{CancellationLedger, ElementStore};
use crate::types::CancellationIntent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationAck {
    Requested {
        intent: CancellationIntent,
        /// False when an intent for the workflow already existed.
        created: bool,
        /// `None` when propagation stalled; the monitor will retry it.
        propagation: Option<PropagationReport>,
    },
    /// The workflow has no elements, so there is nothing to cancel.
    NothingToCancel { workflow_name: String },
}

/// Operator entry point for workflow cancellation.
#[derive(Clone)]
pub struct CancellationService {
    elements: Arc<dyn ElementStore>,
    ledger: Arc<dyn CancellationLedger>,
    propagation: PropagationEngine,
}

impl CancellationService {
    pub fn new(
        elements: Arc<dyn ElementStore>,
        ledger: Arc<dyn CancellationLedger>,
        propagation: PropagationEngine,
    ) -> Self {
        Self {
            elements,
            ledger,
            propagation,
        }
    }

    pub async fn request_workflow_cancellation(
        &self,
        workflow_name: &str,
    ) -> Result<CancellationAck> {
        let elements = self.elements.query_by_workflow(workflow_name).await?;
        if elements.is_empty() {
            log::info!("No elements for {}; nothing to cancel", workflow_name);
            return Ok(CancellationAck::NothingToCancel {
                workflow_name: workflow_name.to_string(),
            });
        }

        let (mut intent, created) = self
            .ledger
            .request_cancellation(workflow_name, elements.len() as u64)
            .await?;
        if created {
            log::info!(
                "Cancellation requested for {} ({} elements)",
                workflow_name,
                elements.len()
            );
        }

        let propagation = match self.propagation.propagate(workflow_name).await {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!(
                    "Initial propagation for {} incomplete, leaving it to the monitor: {}",
                    workflow_name,
                    e
                );
                None
            }
        };

        // Elements enqueued after an earlier cancellation converged.
        let reopened = propagation.as_ref().map(|r| r.changes() > 0).unwrap_or(true);
        if intent.resolved && reopened {
            self.ledger.reopen(workflow_name).await?;
            intent.resolved = false;
            intent.resolved_at = None;
            log::info!("Reopened cancellation of {}", workflow_name);
        }

        Ok(CancellationAck::Requested {
            intent,
            created,
            propagation,
        })
    }

    pub async fn get_intent(&self, workflow_name: &str) -> Result<Option<CancellationIntent>> {
        Ok(self.ledger.get_intent(workflow_name).await?)
    }
}
