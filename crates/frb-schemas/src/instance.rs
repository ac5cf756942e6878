use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::order::{Allocation, ResourceType};

/// Normalized view of a cloud's own instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceStatus {
    Creating,
    Ready,
    Failed,
}

/// A provisioned (or provisioning) resource as reported by its cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub resource_type: ResourceType,
    /// Raw state string from the cloud, e.g. "BUILD" or "ACTIVE".
    pub cloud_state: String,
    pub status: InstanceStatus,
    pub allocation: Option<Allocation>,
    /// Type-specific details (ip address, device name, ...).
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(
        id: impl Into<String>,
        resource_type: ResourceType,
        cloud_state: impl Into<String>,
        status: InstanceStatus,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type,
            cloud_state: cloud_state.into(),
            status,
            allocation: None,
            details: BTreeMap::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == InstanceStatus::Ready
    }

    pub fn has_failed(&self) -> bool {
        self.status == InstanceStatus::Failed
    }
}
