//! The broker runtime: reconciliation workers, request-path controller,
//! inbound federation facade, and the wiring that assembles them.

mod controller;
mod facade;
mod processor;
mod runtime;
mod workers;

pub use controller::OrderController;
pub use facade::RemoteFacade;
pub use processor::{OrderProcessor, PassReport};
pub use runtime::{BrokerRuntime, FederationLink, RuntimeParts, DRIVER_SIMULATED};
pub use workers::{spawn_workers, WorkerIntervals};
