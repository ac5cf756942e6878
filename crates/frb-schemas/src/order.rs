use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::OrderState;
use crate::user::FederationUser;

// ---------------------------------------------------------------------------
// OrderId
// ---------------------------------------------------------------------------

/// Unique, never reused order identifier. The nil UUID is not a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OrderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// ResourceType / ResourceSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Compute,
    Network,
    Volume,
    Attachment,
    PublicIp,
    SecurityRule,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Compute => "compute",
            ResourceType::Network => "network",
            ResourceType::Volume => "volume",
            ResourceType::Attachment => "attachment",
            ResourceType::PublicIp => "public-ip",
            ResourceType::SecurityRule => "security-rule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compute" => Some(ResourceType::Compute),
            "network" => Some(ResourceType::Network),
            "volume" => Some(ResourceType::Volume),
            "attachment" => Some(ResourceType::Attachment),
            "public-ip" => Some(ResourceType::PublicIp),
            "security-rule" => Some(ResourceType::SecurityRule),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub name: String,
    pub vcpu: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub image_id: String,
    pub public_key: Option<String>,
    /// Network orders the instance must be attached to.
    #[serde(default)]
    pub network_order_ids: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub cidr: String,
    pub gateway: Option<String>,
    /// "dynamic" | "static"
    pub allocation_mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSpec {
    pub compute_order_id: OrderId,
    pub volume_order_id: OrderId,
    pub device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpSpec {
    pub compute_order_id: OrderId,
}

/// Resource-type specific attributes of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceSpec {
    Compute(ComputeSpec),
    Network(NetworkSpec),
    Volume(VolumeSpec),
    Attachment(AttachmentSpec),
    PublicIp(PublicIpSpec),
}

impl ResourceSpec {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceSpec::Compute(_) => ResourceType::Compute,
            ResourceSpec::Network(_) => ResourceType::Network,
            ResourceSpec::Volume(_) => ResourceType::Volume,
            ResourceSpec::Attachment(_) => ResourceType::Attachment,
            ResourceSpec::PublicIp(_) => ResourceType::PublicIp,
        }
    }
}

/// What the cloud actually handed out once the instance became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocation {
    pub vcpu: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A request for one federated resource, tracked through [`OrderState`].
///
/// Identity fields (`id`, `requester`, `provider`, `cloud_name`, `user`,
/// `spec`) are fixed at construction. Lifecycle fields change only through
/// [`Order::apply`](crate::fsm) and the set-once helpers below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    pub(crate) state: OrderState,
    requester: String,
    provider: String,
    cloud_name: String,
    user: FederationUser,
    pub(crate) instance_id: Option<String>,
    spec: ResourceSpec,
    pub(crate) fulfilled_at: Option<DateTime<Utc>>,
    pub(crate) actual_allocation: Option<Allocation>,
    pub(crate) fault_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in the `Open` state with a fresh id.
    pub fn new(
        requester: impl Into<String>,
        provider: impl Into<String>,
        cloud_name: impl Into<String>,
        user: FederationUser,
        spec: ResourceSpec,
    ) -> Self {
        Self {
            id: OrderId::new(),
            state: OrderState::Open,
            requester: requester.into(),
            provider: provider.into(),
            cloud_name: cloud_name.into(),
            user,
            instance_id: None,
            spec,
            fulfilled_at: None,
            actual_allocation: None,
            fault_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    pub fn user(&self) -> &FederationUser {
        &self.user
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn resource_type(&self) -> ResourceType {
        self.spec.resource_type()
    }

    pub fn fulfilled_at(&self) -> Option<DateTime<Utc>> {
        self.fulfilled_at
    }

    pub fn actual_allocation(&self) -> Option<Allocation> {
        self.actual_allocation
    }

    pub fn fault_message(&self) -> Option<&str> {
        self.fault_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True when `local_provider` is the broker that provisions this order.
    pub fn is_provided_by(&self, local_provider: &str) -> bool {
        self.provider == local_provider
    }

    /// True when the order was requested through another broker.
    pub fn is_requested_remotely(&self, local_provider: &str) -> bool {
        self.requester != local_provider
    }

    /// Record a fault description. The first fault wins.
    pub fn set_fault_message(&mut self, msg: impl Into<String>) {
        if self.fault_message.is_none() {
            self.fault_message = Some(msg.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_order() -> Order {
        Order::new(
            "broker-a",
            "broker-b",
            "default",
            FederationUser::new("u1", "idp", "alice"),
            ResourceSpec::Volume(VolumeSpec {
                name: "scratch".into(),
                size_gb: 10,
            }),
        )
    }

    #[test]
    fn new_order_starts_open_with_nothing_assigned() {
        let o = volume_order();
        assert_eq!(o.state(), OrderState::Open);
        assert!(!o.id().is_nil());
        assert!(o.instance_id().is_none());
        assert!(o.fulfilled_at().is_none());
        assert_eq!(o.resource_type(), ResourceType::Volume);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(volume_order().id(), volume_order().id());
    }

    #[test]
    fn locality_is_relative_to_the_asking_broker() {
        let o = volume_order();
        assert!(o.is_provided_by("broker-b"));
        assert!(!o.is_provided_by("broker-a"));
        assert!(o.is_requested_remotely("broker-b"));
        assert!(!o.is_requested_remotely("broker-a"));
    }

    #[test]
    fn first_fault_message_wins() {
        let mut o = volume_order();
        o.set_fault_message("quota exceeded");
        o.set_fault_message("later noise");
        assert_eq!(o.fault_message(), Some("quota exceeded"));
    }

    #[test]
    fn order_survives_json_with_spec_tag() {
        let o = volume_order();
        let v = serde_json::to_value(&o).unwrap();
        assert_eq!(v["spec"]["kind"], "volume");
        assert_eq!(v["state"], "OPEN");
        let back: Order = serde_json::from_value(v).unwrap();
        assert_eq!(back, o);
    }

    #[test]
    fn order_id_parses_its_display() {
        let id = OrderId::new();
        let parsed: OrderId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
