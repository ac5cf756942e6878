//! Order state machine.
//!
//! Every lifecycle change is applied through [`Order::apply`]. Illegal
//! events return [`TransitionError`] and leave the order untouched, so a
//! caller holding a checked-out copy can simply drop it.
//!
//! | from              | event              | to        |
//! |-------------------|--------------------|-----------|
//! | OPEN              | Submitted          | SPAWNING  |
//! | OPEN              | Rejected           | FAILED    |
//! | SPAWNING          | InstanceReady      | FULFILLED |
//! | SPAWNING          | InstanceFailed     | FAILED    |
//! | FULFILLED         | InstanceFailed     | FAILED    |
//! | FULFILLED         | DeletionRequested  | CLOSED    |
//! | OPEN, SPAWNING    | DeletionRequested  | FAILED    |
//! | FAILED            | DeletionRequested  | CLOSED    |
//! | FAILED            | Released           | CLOSED    |

use chrono::{DateTime, Utc};

use crate::order::{Allocation, Order};
use crate::state::OrderState;

// ---------------------------------------------------------------------------
// OrderEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    /// The provider accepted the provisioning request. Remote orders carry
    /// no instance id on the requesting side.
    Submitted { instance_id: Option<String> },
    /// The provider refused the request for a non-retryable reason.
    Rejected { reason: String },
    /// The instance reported ready.
    InstanceReady {
        allocation: Option<Allocation>,
        at: DateTime<Utc>,
    },
    /// The instance failed, or vanished while in use.
    InstanceFailed { reason: String },
    /// Administrative deletion.
    DeletionRequested,
    /// Partial resources of a failed order were released.
    Released,
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when an event cannot legally be applied in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OrderState,
    /// Debug string of the rejected event.
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal order transition: {} + {}", self.from, self.event)
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// Order::apply
// ---------------------------------------------------------------------------

impl Order {
    pub fn apply(&mut self, event: &OrderEvent) -> Result<(), TransitionError> {
        use OrderEvent::*;
        use OrderState::*;

        match (self.state, event) {
            (Open, Submitted { instance_id }) => {
                self.instance_id = instance_id.clone();
                self.state = Spawning;
            }

            (Open, Rejected { reason }) => {
                self.set_fault_message(reason.clone());
                self.state = Failed;
            }

            // ------------------------------------------------------------------
            // Readiness: fulfilled-at is stamped exactly once.
            // ------------------------------------------------------------------
            (Spawning, InstanceReady { allocation, at }) => {
                if self.fulfilled_at.is_none() {
                    self.fulfilled_at = Some(*at);
                }
                if allocation.is_some() {
                    self.actual_allocation = *allocation;
                }
                self.state = Fulfilled;
            }

            (Spawning | Fulfilled, InstanceFailed { reason }) => {
                self.set_fault_message(reason.clone());
                self.state = Failed;
            }

            // ------------------------------------------------------------------
            // Deletion: anything still holding cloud resources goes through
            // FAILED so the release step runs; a ready instance is released
            // by the caller before the transition.
            // ------------------------------------------------------------------
            (Open | Spawning, DeletionRequested) => {
                self.set_fault_message("deletion requested");
                self.state = Failed;
            }

            (Fulfilled | Failed, DeletionRequested) => self.state = Closed,

            (Failed, Released) => self.state = Closed,

            (state, ev) => {
                return Err(TransitionError {
                    from: state,
                    event: format!("{ev:?}"),
                });
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
