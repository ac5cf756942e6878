//! Reconciliation workers: one long-lived task per active state, each
//! running [`OrderProcessor::run_pass`] on a fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use frb_config::WorkerSection;
use frb_schemas::OrderState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::processor::OrderProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIntervals {
    pub open: Duration,
    pub spawning: Duration,
    pub fulfilled: Duration,
    pub failed: Duration,
}

impl WorkerIntervals {
    pub fn from_config(w: &WorkerSection) -> Self {
        Self {
            open: Duration::from_millis(w.open_sleep_ms),
            spawning: Duration::from_millis(w.spawning_sleep_ms),
            fulfilled: Duration::from_millis(w.fulfilled_sleep_ms),
            failed: Duration::from_millis(w.failed_sleep_ms),
        }
    }

    /// Same interval for every worker. Handy in tests.
    pub fn uniform(every: Duration) -> Self {
        Self {
            open: every,
            spawning: every,
            fulfilled: every,
            failed: every,
        }
    }

    pub fn for_state(&self, state: OrderState) -> Option<Duration> {
        match state {
            OrderState::Open => Some(self.open),
            OrderState::Spawning => Some(self.spawning),
            OrderState::Fulfilled => Some(self.fulfilled),
            OrderState::Failed => Some(self.failed),
            OrderState::Closed => None,
        }
    }
}

impl Default for WorkerIntervals {
    fn default() -> Self {
        Self::from_config(&WorkerSection::default())
    }
}

/// Start one worker per active state. Each stops after its current pass
/// once `shutdown` flips to `true`.
pub fn spawn_workers(
    processor: Arc<OrderProcessor>,
    intervals: WorkerIntervals,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    OrderState::ACTIVE
        .into_iter()
        .filter_map(|state| {
            let every = intervals.for_state(state)?;
            Some(tokio::spawn(run_worker(
                processor.clone(),
                state,
                every,
                shutdown.clone(),
            )))
        })
        .collect()
}

async fn run_worker(
    processor: Arc<OrderProcessor>,
    state: OrderState,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%state, interval_ms = every.as_millis() as u64, "worker started");
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tick.tick() => {
                let report = processor.run_pass(state).await;
                if report.visited > 0 {
                    debug!(%state, ?report, "worker pass");
                }
            }
            changed = shutdown.changed() => {
                // Sender dropped counts as shutdown too.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(%state, "worker stopped");
}
