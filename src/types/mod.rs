pub mod element;
pub mod intent;

pub use element::Element;
pub use intent::CancellationIntent;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ElementId = Uuid;
pub type AgentId = String;
pub type WorkflowName = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementStatus {
    Queued,          // Waiting for an agent to claim it
    Running,         // Claimed and executing on its owner
    Done,            // Finished normally
    Failed,          // Finished with an error
    CancelRequested, // Owner must tear down and acknowledge
    Canceled,        // Cancellation confirmed
}

impl ElementStatus {
    pub const ALL: [ElementStatus; 6] = [
        ElementStatus::Queued,
        ElementStatus::Running,
        ElementStatus::Done,
        ElementStatus::Failed,
        ElementStatus::CancelRequested,
        ElementStatus::Canceled,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            ElementStatus::Queued => "Queued",
            ElementStatus::Running => "Running",
            ElementStatus::Done => "Done",
            ElementStatus::Failed => "Failed",
            ElementStatus::CancelRequested => "CancelRequested",
            ElementStatus::Canceled => "Canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ElementStatus::Done | ElementStatus::Failed | ElementStatus::Canceled
        )
    }

    /// Statuses that a cancellation pass must move to `CancelRequested`.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, ElementStatus::Queued | ElementStatus::Running)
    }

    /// Re-applying cancellation to these statuses is a no-op.
    pub fn absorbs_cancellation(&self) -> bool {
        *self == ElementStatus::CancelRequested || self.is_terminal()
    }
}

impl std::fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
