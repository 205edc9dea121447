use serde::{Deserialize, Serialize};

use crate::error::{CancelError, Result};
use crate::types::{Element, ElementStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementEvent {
    Claimed,
    Completed,
    Failed,
    CancelRequested,
    CancelAcknowledged,
    ReleasedUnclaimed,
}

pub struct ElementStateMachine;

impl ElementStateMachine {
    /// Next status for `element` under `event`, without mutating anything.
    ///
    /// `ReleasedUnclaimed` is only legal for elements that never had an owner;
    /// owned elements leave `CancelRequested` through their owner's
    /// acknowledgment.
    pub fn next_status(element: &Element, event: ElementEvent) -> Result<ElementStatus> {
        let next = match (element.status, event) {
            (ElementStatus::Queued, ElementEvent::Claimed) => ElementStatus::Running,
            (ElementStatus::Running, ElementEvent::Completed) => ElementStatus::Done,
            (ElementStatus::Running, ElementEvent::Failed) => ElementStatus::Failed,

            (ElementStatus::Queued | ElementStatus::Running, ElementEvent::CancelRequested) => {
                ElementStatus::CancelRequested
            }
            (ElementStatus::CancelRequested, ElementEvent::CancelAcknowledged) => {
                ElementStatus::Canceled
            }
            (ElementStatus::CancelRequested, ElementEvent::ReleasedUnclaimed)
                if !element.is_claimed() =>
            {
                ElementStatus::Canceled
            }

            (from, event) => {
                return Err(CancelError::InvalidTransition {
                    id: element.id,
                    from,
                    to: Self::target_of(event),
                });
            }
        };

        Ok(next)
    }

    /// Status an event moves an element to when it is legal.
    pub fn target_of(event: ElementEvent) -> ElementStatus {
        match event {
            ElementEvent::Claimed => ElementStatus::Running,
            ElementEvent::Completed => ElementStatus::Done,
            ElementEvent::Failed => ElementStatus::Failed,
            ElementEvent::CancelRequested => ElementStatus::CancelRequested,
            ElementEvent::CancelAcknowledged | ElementEvent::ReleasedUnclaimed => {
                ElementStatus::Canceled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_element(status: ElementStatus) -> Element {
        Element::new("wf-test").with_status(status)
    }

    #[test]
    fn test_queued_to_running() {
        let element = create_test_element(ElementStatus::Queued);
        let next = ElementStateMachine::next_status(&element, ElementEvent::Claimed);
        assert_eq!(next.unwrap(), ElementStatus::Running);
    }

    #[test]
    fn test_running_completion() {
        let element = create_test_element(ElementStatus::Running);
        assert_eq!(
            ElementStateMachine::next_status(&element, ElementEvent::Completed).unwrap(),
            ElementStatus::Done
        );
        assert_eq!(
            ElementStateMachine::next_status(&element, ElementEvent::Failed).unwrap(),
            ElementStatus::Failed
        );
    }

    #[test]
    fn test_cancel_requested_from_live_statuses() {
        for status in [ElementStatus::Queued, ElementStatus::Running] {
            let element = create_test_element(status);
            let next = ElementStateMachine::next_status(&element, ElementEvent::CancelRequested);
            assert_eq!(next.unwrap(), ElementStatus::CancelRequested);
        }
    }

    #[test]
    fn test_cannot_skip_cancel_requested() {
        let element = create_test_element(ElementStatus::Running).with_owner("agentA");
        let result = ElementStateMachine::next_status(&element, ElementEvent::CancelAcknowledged);
        assert!(matches!(
            result,
            Err(CancelError::InvalidTransition {
                from: ElementStatus::Running,
                to: ElementStatus::Canceled,
                ..
            })
        ));
    }

    #[test]
    fn test_release_requires_unclaimed() {
        let unclaimed = create_test_element(ElementStatus::CancelRequested);
        assert_eq!(
            ElementStateMachine::next_status(&unclaimed, ElementEvent::ReleasedUnclaimed).unwrap(),
            ElementStatus::Canceled
        );

        let owned = create_test_element(ElementStatus::CancelRequested).with_owner("agentA");
        assert!(ElementStateMachine::next_status(&owned, ElementEvent::ReleasedUnclaimed).is_err());
    }

    #[test]
    fn test_terminal_statuses_reject_events() {
        let element = create_test_element(ElementStatus::Canceled);
        assert!(ElementStateMachine::next_status(&element, ElementEvent::CancelRequested).is_err());
        assert!(ElementStateMachine::next_status(&element, ElementEvent::Claimed).is_err());
    }
}
