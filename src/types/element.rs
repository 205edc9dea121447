use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, ElementId, ElementStatus, WorkflowName};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub workflow_name: WorkflowName,
    pub status: ElementStatus,
    pub last_modified: DateTime<Utc>,
    pub owner_agent_id: Option<AgentId>,
    pub version: u64,
}

impl Element {
    pub fn new(workflow_name: impl Into<WorkflowName>) -> Self {
        Self {
            id: ElementId::new_v4(),
            workflow_name: workflow_name.into(),
            status: ElementStatus::Queued,
            last_modified: Utc::now(),
            owner_agent_id: None,
            version: 0,
        }
    }

    pub fn with_status(mut self, status: ElementStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_owner(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.owner_agent_id = Some(agent_id.into());
        self
    }

    pub fn is_owned_by(&self, agent_id: &str) -> bool {
        self.owner_agent_id.as_deref() == Some(agent_id)
    }

    pub fn is_claimed(&self) -> bool {
        self.owner_agent_id.is_some()
    }

    /// Seconds since the last status change, as seen at `now`.
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_modified).num_seconds()
    }
}
