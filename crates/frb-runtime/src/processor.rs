//! One reconciliation pass over one state's bucket.
//!
//! | state     | action                              | outcome                              |
//! |-----------|-------------------------------------|--------------------------------------|
//! | OPEN      | request instance                    | SPAWNING, or FAILED on rejection     |
//! | SPAWNING  | poll instance                       | FULFILLED / FAILED / stay            |
//! | FULFILLED | health check                        | FAILED when failed or gone, else stay|
//! | FAILED    | release partial resources           | CLOSED                               |
//!
//! Transient errors (unavailable provider, communication) leave the order
//! where it is for the next pass. Any other error is a rejection and moves
//! the order to FAILED. A single order never aborts the pass.

use std::sync::Arc;

use chrono::Utc;
use frb_execution::ProviderDispatcher;
use frb_orders::{OrderRegistry, RegistryError};
use frb_schemas::{BrokerError, BrokerResult, Instance, Order, OrderEvent, OrderState};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub visited: usize,
    /// Moved to a state other than FAILED.
    pub advanced: usize,
    /// Moved to FAILED.
    pub failed: usize,
    /// Left in place: nothing to do yet, transient error, or lost a race.
    pub retained: usize,
}

pub struct OrderProcessor {
    registry: Arc<OrderRegistry>,
    dispatcher: Arc<ProviderDispatcher>,
}

impl OrderProcessor {
    pub fn new(registry: Arc<OrderRegistry>, dispatcher: Arc<ProviderDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub async fn run_pass(&self, state: OrderState) -> PassReport {
        let mut report = PassReport::default();
        if state.is_terminal() {
            return report;
        }

        self.registry.reset_cursor(state);
        while let Some(order) = self.registry.next_in(state) {
            report.visited += 1;

            let Some(event) = self.decide(&order).await else {
                report.retained += 1;
                continue;
            };

            let mut next = order.clone();
            if let Err(e) = next.apply(&event) {
                warn!(order_id = %order.id(), %state, error = %e, "event rejected by state machine");
                report.retained += 1;
                continue;
            }

            match self.registry.commit(&next, state).await {
                Ok(()) => {
                    if next.state() == OrderState::Failed {
                        report.failed += 1;
                    } else {
                        report.advanced += 1;
                    }
                    self.notify_requester(&next).await;
                }
                Err(RegistryError::Stale { actual, .. }) => {
                    debug!(order_id = %order.id(), %state, %actual, "order moved by another actor; skipped");
                    report.retained += 1;
                    self.withdraw_submission(&order, &next).await;
                }
                Err(e) => {
                    warn!(order_id = %order.id(), %state, error = %e, "commit failed; order stays for retry");
                    report.retained += 1;
                    self.withdraw_submission(&order, &next).await;
                }
            }
        }

        if report.visited > 0 {
            debug!(%state, ?report, "pass complete");
        }
        report
    }

    // -----------------------------------------------------------------------
    // Per-state actions
    // -----------------------------------------------------------------------

    async fn decide(&self, order: &Order) -> Option<OrderEvent> {
        match order.state() {
            OrderState::Open => match self.request_instance(order).await {
                Ok(instance_id) => Some(OrderEvent::Submitted { instance_id }),
                Err(e) => rejection(order, e, |reason| OrderEvent::Rejected { reason }),
            },

            OrderState::Spawning => match self.fetch_instance(order).await {
                Ok(i) if i.is_ready() => Some(OrderEvent::InstanceReady {
                    allocation: i.allocation,
                    at: Utc::now(),
                }),
                Ok(i) if i.has_failed() => Some(OrderEvent::InstanceFailed {
                    reason: failed_reason(&i),
                }),
                Ok(_) => None,
                Err(e) => rejection(order, e, |reason| OrderEvent::InstanceFailed { reason }),
            },

            OrderState::Fulfilled => match self.fetch_instance(order).await {
                Ok(i) if i.has_failed() => Some(OrderEvent::InstanceFailed {
                    reason: failed_reason(&i),
                }),
                Ok(_) => None,
                Err(BrokerError::InstanceNotFound(m)) => Some(OrderEvent::InstanceFailed {
                    reason: format!("instance vanished: {m}"),
                }),
                Err(e) => rejection(order, e, |reason| OrderEvent::InstanceFailed { reason }),
            },

            OrderState::Failed => match self.release(order).await {
                Ok(()) => Some(OrderEvent::Released),
                Err(e) if e.is_transient() => {
                    warn!(order_id = %order.id(), error = %e, "release deferred");
                    None
                }
                Err(e) => {
                    warn!(order_id = %order.id(), error = %e, "release failed; closing anyway");
                    Some(OrderEvent::Released)
                }
            },

            OrderState::Closed => None,
        }
    }

    async fn request_instance(&self, order: &Order) -> BrokerResult<Option<String>> {
        self.dispatcher
            .for_order(order)?
            .request_instance(order)
            .await
    }

    async fn fetch_instance(&self, order: &Order) -> BrokerResult<Instance> {
        self.dispatcher.for_order(order)?.get_instance(order).await
    }

    async fn release(&self, order: &Order) -> BrokerResult<()> {
        self.dispatcher.for_order(order)?.delete_instance(order).await
    }

    /// An instance created for an OPEN order whose commit did not land is
    /// recorded nowhere; the next pass would provision another one.
    async fn withdraw_submission(&self, before: &Order, after: &Order) {
        if before.state() != OrderState::Open || after.instance_id().is_none() {
            return;
        }
        if before.instance_id() == after.instance_id() {
            return;
        }
        match self.release(after).await {
            Ok(()) => {
                info!(order_id = %after.id(), instance_id = ?after.instance_id(), "unrecorded instance released")
            }
            Err(e) => {
                warn!(order_id = %after.id(), instance_id = ?after.instance_id(), error = %e, "could not release unrecorded instance")
            }
        }
    }

    /// Providing side of a remote order: tell the requester it settled.
    async fn notify_requester(&self, order: &Order) {
        let local = self.dispatcher.local_id();
        if !order.is_provided_by(local) || !order.is_requested_remotely(local) {
            return;
        }
        if !matches!(order.state(), OrderState::Fulfilled | OrderState::Failed) {
            return;
        }
        let Some(client) = self.dispatcher.remote_client() else {
            return;
        };
        match client.notify_event(order, order.state()).await {
            Ok(()) => {
                info!(order_id = %order.id(), requester = %order.requester(), state = %order.state(), "requester notified")
            }
            Err(e) => {
                warn!(order_id = %order.id(), requester = %order.requester(), error = %e, "notify-event failed")
            }
        }
    }
}

fn failed_reason(i: &Instance) -> String {
    format!("instance {} failed in cloud ({})", i.id, i.cloud_state)
}

/// Transient errors keep the order; anything else becomes `make(reason)`.
fn rejection(
    order: &Order,
    err: BrokerError,
    make: impl FnOnce(String) -> OrderEvent,
) -> Option<OrderEvent> {
    if err.is_transient() {
        warn!(order_id = %order.id(), state = %order.state(), error = %err, "transient failure; will retry");
        return None;
    }
    warn!(order_id = %order.id(), state = %order.state(), error = %err, "order rejected");
    Some(make(err.to_string()))
}
