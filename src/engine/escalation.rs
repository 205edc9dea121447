use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{ElementId, WorkflowName};

/// A workflow whose cancellation is not converging.
///
/// `stale_element_ids` are `CancelRequested` elements their owners have not
/// acknowledged. `stalled_element_ids` are still live because propagation
/// keeps failing; `propagation_error` carries the last failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub workflow_name: WorkflowName,
    pub stale_element_ids: Vec<ElementId>,
    pub stalled_element_ids: Vec<ElementId>,
    pub propagation_error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub raised_at: DateTime<Utc>,
}

/// One-way operator notification. Delivery failures are the sink's concern.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn escalate(&self, escalation: Escalation);
}

pub struct LogEscalationSink;

#[async_trait]
impl EscalationSink for LogEscalationSink {
    async fn escalate(&self, escalation: Escalation) {
        if !escalation.stale_element_ids.is_empty() {
            log::warn!(
                "Cancellation of {} stalled since {}: {} element(s) unacknowledged: {:?}",
                escalation.workflow_name,
                escalation.requested_at,
                escalation.stale_element_ids.len(),
                escalation.stale_element_ids
            );
        }
        if !escalation.stalled_element_ids.is_empty() {
            log::warn!(
                "Cancellation of {} cannot reach {} live element(s) since {}: {}",
                escalation.workflow_name,
                escalation.stalled_element_ids.len(),
                escalation.requested_at,
                escalation.propagation_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Forwards escalations to an in-process consumer (alerting, ticketing).
pub struct ChannelEscalationSink {
    sender: mpsc::UnboundedSender<Escalation>,
}

impl ChannelEscalationSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Escalation>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EscalationSink for ChannelEscalationSink {
    async fn escalate(&self, escalation: Escalation) {
        let workflow_name = escalation.workflow_name.clone();
        if self.sender.send(escalation).is_err() {
            log::error!(
                "Escalation receiver dropped; lost escalation for {}",
                workflow_name
            );
        }
    }
}
