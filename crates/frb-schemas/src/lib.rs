//! Shared domain types for the federated resource broker.
//!
//! Everything that crosses a crate boundary lives here: the [`Order`]
//! entity and its [`OrderState`] machine, instance and catalog payloads, the
//! federated user identity and the closed [`BrokerError`] taxonomy.

pub mod catalog;
pub mod error;
pub mod fsm;
pub mod instance;
pub mod order;
pub mod state;
pub mod user;

pub use catalog::{
    Direction, EtherType, Image, ImageSummary, LifecycleOp, Protocol, Quota, ResourceAmounts,
    SecurityRule, SecurityRuleInstance,
};
pub use error::{BrokerError, BrokerResult, ErrorKind};
pub use fsm::{OrderEvent, TransitionError};
pub use instance::{Instance, InstanceStatus};
pub use order::{
    Allocation, AttachmentSpec, ComputeSpec, NetworkSpec, Order, OrderId, PublicIpSpec,
    ResourceSpec, ResourceType, VolumeSpec,
};
pub use state::OrderState;
pub use user::FederationUser;
