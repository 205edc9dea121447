use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkflowName;

/// Durable record that a workflow has been asked to cancel.
///
/// One record exists per workflow. Records are never deleted; `resolved`
/// flips once every known element of the workflow has settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationIntent {
    pub workflow_name: WorkflowName,
    pub requested_at: DateTime<Utc>,
    pub acknowledged_element_count: u64,
    pub total_element_count_at_request_time: u64,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CancellationIntent {
    pub fn new(workflow_name: impl Into<WorkflowName>, total_element_count: u64) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            requested_at: Utc::now(),
            acknowledged_element_count: 0,
            total_element_count_at_request_time: total_element_count,
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.requested_at).num_seconds()
    }
}
