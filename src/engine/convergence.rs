use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::engine::escalation::{Escalation, EscalationSink};
use crate::engine::propagation::PropagationEngine;
use crate::error::Result;
use crate::storage::{CancellationLedger, ElementStore};
use crate::types::{CancellationIntent, ElementId, ElementStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    /// How long an intent may stay unresolved before stragglers are escalated.
    pub grace_period_secs: u64,
    /// How long a `CancelRequested` element may go without a status change.
    pub staleness_threshold_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            grace_period_secs: 3_600,
            staleness_threshold_secs: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowReconciliation {
    pub workflow_name: String,
    pub total: u64,
    pub acknowledged: u64,
    pub settled: u64,
    pub resolved: bool,
    pub stale_element_ids: Vec<ElementId>,
    /// Live elements propagation failed to reach after the grace period.
    pub stalled_element_ids: Vec<ElementId>,
    pub propagation_error: Option<String>,
}

impl WorkflowReconciliation {
    pub fn escalated(&self) -> bool {
        !self.stale_element_ids.is_empty() || !self.stalled_element_ids.is_empty()
    }
}

/// Periodic reconciliation of the ledger against element states.
pub struct ConvergenceMonitor {
    elements: Arc<dyn ElementStore>,
    ledger: Arc<dyn CancellationLedger>,
    propagation: PropagationEngine,
    escalation: Arc<dyn EscalationSink>,
    config: MonitorConfig,
}

impl ConvergenceMonitor {
    pub fn new(
        elements: Arc<dyn ElementStore>,
        ledger: Arc<dyn CancellationLedger>,
        propagation: PropagationEngine,
        escalation: Arc<dyn EscalationSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            elements,
            ledger,
            propagation,
            escalation,
            config,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "Convergence monitor started (interval {}ms, grace {}s)",
            self.config.interval_ms,
            self.config.grace_period_secs
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        log::error!("Reconciliation pass failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Convergence monitor stopped");
    }

    pub async fn reconcile_once(&self) -> Result<Vec<WorkflowReconciliation>> {
        self.reconcile_at(Utc::now()).await
    }

    /// One pass over every unresolved intent, judging staleness as of `now`.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowReconciliation>> {
        let intents = self.ledger.list_unresolved().await?;
        let mut results = Vec::with_capacity(intents.len());

        for intent in intents {
            match self.reconcile_workflow(&intent, now).await {
                Ok(result) => results.push(result),
                Err(e) => log::error!(
                    "Failed to reconcile cancellation of {}: {}",
                    intent.workflow_name,
                    e
                ),
            }
        }

        Ok(results)
    }

    async fn reconcile_workflow(
        &self,
        intent: &CancellationIntent,
        now: DateTime<Utc>,
    ) -> Result<WorkflowReconciliation> {
        let workflow_name = intent.workflow_name.as_str();

        let propagation_error = match self.propagation.propagate(workflow_name).await {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };

        let elements = self.elements.query_by_workflow(workflow_name).await?;
        let total = elements.len() as u64;
        let acknowledged = elements
            .iter()
            .filter(|e| e.status == ElementStatus::Canceled)
            .count() as u64;
        let settled = elements.iter().filter(|e| e.status.is_terminal()).count() as u64;

        if acknowledged != intent.acknowledged_element_count {
            self.ledger
                .update_progress(workflow_name, acknowledged)
                .await?;
        }

        let mut result = WorkflowReconciliation {
            workflow_name: workflow_name.to_string(),
            total,
            acknowledged,
            settled,
            resolved: false,
            stale_element_ids: Vec::new(),
            stalled_element_ids: Vec::new(),
            propagation_error,
        };

        if settled == total {
            self.ledger.mark_resolved(workflow_name).await?;
            log::info!(
                "Cancellation of {} converged: {}/{} elements canceled",
                workflow_name,
                acknowledged,
                total
            );
            result.resolved = true;
            return Ok(result);
        }

        if intent.age_secs(now) > self.config.grace_period_secs as i64 {
            result.stale_element_ids = elements
                .iter()
                .filter(|e| {
                    e.status == ElementStatus::CancelRequested
                        && e.idle_secs(now) > self.config.staleness_threshold_secs as i64
                })
                .map(|e| e.id)
                .collect();

            if result.propagation_error.is_some() {
                result.stalled_element_ids = elements
                    .iter()
                    .filter(|e| e.status.is_cancellable())
                    .map(|e| e.id)
                    .collect();
            }
        }

        if result.escalated() {
            self.escalation
                .escalate(Escalation {
                    workflow_name: workflow_name.to_string(),
                    stale_element_ids: result.stale_element_ids.clone(),
                    stalled_element_ids: result.stalled_element_ids.clone(),
                    propagation_error: result.propagation_error.clone(),
                    requested_at: intent.requested_at,
                    raised_at: now,
                })
                .await;
        }

        Ok(result)
    }
}
