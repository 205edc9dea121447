use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{CancelError, Result};
use crate::protocol::agent::{AckOutcome, AgentProtocol};
use crate::types::{AgentId, Element};

/// Local work stoppage for one element.
///
/// Delivery is at-least-once: the same element can be handed over again
/// after a restart or a failed acknowledgment, so implementations must
/// tolerate repeats.
#[async_trait]
pub trait Teardown: Send + Sync {
    async fn teardown(&self, element: &Element) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerPassReport {
    pub polled: usize,
    pub acknowledged: usize,
    pub already_acknowledged: usize,
    pub teardown_failures: usize,
    /// Transient failures left for the next pass.
    pub deferred: usize,
    /// Permanent refusals for this agent, e.g. ownership mismatch.
    pub rejected: usize,
}

pub struct AgentWorker<T: Teardown> {
    agent_id: AgentId,
    protocol: Arc<AgentProtocol>,
    teardown: T,
    config: WorkerConfig,
}

impl<T: Teardown> AgentWorker<T> {
    pub fn new(
        agent_id: impl Into<AgentId>,
        protocol: Arc<AgentProtocol>,
        teardown: T,
        config: WorkerConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            protocol,
            teardown,
            config,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn claim_next(&self) -> Result<Option<Element>> {
        self.protocol.claim(&self.agent_id).await
    }

    pub async fn run_cancellation_pass(&self) -> Result<WorkerPassReport> {
        let pending = self.protocol.poll_cancellations(&self.agent_id).await?;
        let mut report = WorkerPassReport {
            polled: pending.len(),
            ..Default::default()
        };

        for element in pending {
            if let Err(e) = self.teardown.teardown(&element).await {
                log::warn!(
                    "Teardown of {} failed on agent {}: {}",
                    element.id,
                    self.agent_id,
                    e
                );
                report.teardown_failures += 1;
                continue;
            }

            match self.protocol.acknowledge(element.id, &self.agent_id).await {
                Ok(AckOutcome::Acknowledged(_)) => report.acknowledged += 1,
                Ok(AckOutcome::AlreadyAcknowledged(_)) => report.already_acknowledged += 1,
                Err(e) if e.is_transient() => {
                    log::warn!("Acknowledgment of {} deferred: {}", element.id, e);
                    report.deferred += 1;
                }
                Err(
                    e @ (CancelError::OwnershipMismatch { .. }
                    | CancelError::InvalidTransition { .. }
                    | CancelError::ElementNotFound(_)),
                ) => {
                    log::warn!("Acknowledgment of {} rejected: {}", element.id, e);
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cancellation_pass().await {
                        log::error!("Cancellation poll failed on agent {}: {}", self.agent_id, e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
