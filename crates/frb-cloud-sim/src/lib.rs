//! Deterministic in-memory cloud.
//!
//! Design decisions:
//! - Instance ids are `sim-{resource type}-{seq}` with one counter per cloud.
//! - A new instance reports `BUILD` and turns `ACTIVE` on the
//!   `ready_after_polls`-th `get_instance`. No timers, no randomness.
//! - `max_instances` bounds live instances; beyond it requests are refused
//!   as a quota violation.
//! - Test hooks (`fail_instance`, `vanish`, `set_unavailable`) drive the
//!   failure paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use frb_execution::{CloudPlugins, CloudServicesPlugin, ProvisioningPlugin};
use frb_schemas::{
    Allocation, BrokerError, BrokerResult, FederationUser, Image, ImageSummary, Instance,
    InstanceStatus, LifecycleOp, Order, Quota, ResourceAmounts, ResourceSpec, ResourceType,
    SecurityRule, SecurityRuleInstance,
};
use parking_lot::Mutex;
use tracing::debug;

pub const STATE_BUILD: &str = "BUILD";
pub const STATE_ACTIVE: &str = "ACTIVE";
pub const STATE_ERROR: &str = "ERROR";
pub const STATE_PAUSED: &str = "PAUSED";
pub const STATE_HIBERNATED: &str = "HIBERNATED";
pub const STATE_SHUTOFF: &str = "SHUTOFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSettings {
    pub ready_after_polls: u32,
    pub max_instances: usize,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            ready_after_polls: 1,
            max_instances: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct SimInstance {
    resource_type: ResourceType,
    cloud_state: String,
    polls: u32,
    allocation: Option<Allocation>,
}

#[derive(Debug, Default)]
struct SimState {
    seq: u64,
    instances: BTreeMap<String, SimInstance>,
    images: BTreeMap<String, Image>,
    /// rule id -> (target instance id, rule)
    rules: BTreeMap<String, (String, SecurityRuleInstance)>,
    unavailable: bool,
}

impl SimState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("sim-{prefix}-{}", self.seq)
    }

    fn check_available(&self) -> BrokerResult<()> {
        if self.unavailable {
            return Err(BrokerError::UnavailableProvider(
                "simulated cloud is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

fn seed_images() -> BTreeMap<String, Image> {
    [("img-ubuntu", "ubuntu-22.04"), ("img-debian", "debian-12")]
        .into_iter()
        .map(|(id, name)| {
            (
                id.to_string(),
                Image {
                    id: id.to_string(),
                    name: name.to_string(),
                    size_mb: 2048,
                    min_disk_gb: 10,
                    min_ram_mb: 512,
                    status: "active".to_string(),
                },
            )
        })
        .collect()
}

/// One simulated cloud. Clone shares state.
#[derive(Clone)]
pub struct SimCloud {
    name: String,
    settings: SimSettings,
    state: Arc<Mutex<SimState>>,
}

impl SimCloud {
    pub fn new(name: impl Into<String>, settings: SimSettings) -> Self {
        let state = SimState {
            images: seed_images(),
            ..Default::default()
        };
        Self {
            name: name.into(),
            settings,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugins for every provisionable resource type plus catalog services.
    pub fn plugins(&self) -> CloudPlugins {
        let mut plugins = CloudPlugins::new(Arc::new(SimServices {
            cloud: self.clone(),
        }));
        for rt in [
            ResourceType::Compute,
            ResourceType::Network,
            ResourceType::Volume,
            ResourceType::Attachment,
            ResourceType::PublicIp,
        ] {
            plugins = plugins.with_plugin(Arc::new(SimProvisioning {
                resource_type: rt,
                cloud: self.clone(),
            }));
        }
        plugins
    }

    // -----------------------------------------------------------------------
    // Test hooks
    // -----------------------------------------------------------------------

    pub fn fail_instance(&self, instance_id: &str) -> bool {
        match self.state.lock().instances.get_mut(instance_id) {
            Some(i) => {
                i.cloud_state = STATE_ERROR.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop an instance behind the broker's back.
    pub fn vanish(&self, instance_id: &str) -> bool {
        self.state.lock().instances.remove(instance_id).is_some()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }

    pub fn cloud_state(&self, instance_id: &str) -> Option<String> {
        self.state
            .lock()
            .instances
            .get(instance_id)
            .map(|i| i.cloud_state.clone())
    }
}

fn allocation_for(spec: &ResourceSpec) -> Option<Allocation> {
    match spec {
        ResourceSpec::Compute(c) => Some(Allocation {
            vcpu: c.vcpu,
            memory_mb: c.memory_mb,
            disk_gb: c.disk_gb,
        }),
        ResourceSpec::Volume(v) => Some(Allocation {
            disk_gb: v.size_gb,
            ..Default::default()
        }),
        _ => None,
    }
}

fn prefix(rt: ResourceType) -> &'static str {
    match rt {
        ResourceType::Compute => "compute",
        ResourceType::Network => "network",
        ResourceType::Volume => "volume",
        ResourceType::Attachment => "attachment",
        ResourceType::PublicIp => "publicip",
        ResourceType::SecurityRule => "rule",
    }
}

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

struct SimProvisioning {
    resource_type: ResourceType,
    cloud: SimCloud,
}

#[async_trait]
impl ProvisioningPlugin for SimProvisioning {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    async fn request_instance(&self, order: &Order) -> BrokerResult<String> {
        if let ResourceSpec::Compute(c) = order.spec() {
            if c.vcpu == 0 || c.memory_mb == 0 {
                return Err(BrokerError::InvalidParameter(
                    "compute orders need at least one vcpu and some memory".to_string(),
                ));
            }
        }

        let mut st = self.cloud.state.lock();
        st.check_available()?;
        if st.instances.len() >= self.cloud.settings.max_instances {
            return Err(BrokerError::UnacceptableOperation(format!(
                "quota exceeded on cloud '{}': {} instances",
                self.cloud.name, self.cloud.settings.max_instances
            )));
        }
        let id = st.next_id(prefix(self.resource_type));
        st.instances.insert(
            id.clone(),
            SimInstance {
                resource_type: self.resource_type,
                cloud_state: STATE_BUILD.to_string(),
                polls: 0,
                allocation: allocation_for(order.spec()),
            },
        );
        debug!(cloud = %self.cloud.name, instance_id = %id, "sim instance created");
        Ok(id)
    }

    async fn get_instance(&self, _order: &Order, instance_id: &str) -> BrokerResult<Instance> {
        let ready_after = self.cloud.settings.ready_after_polls;
        let mut st = self.cloud.state.lock();
        st.check_available()?;
        let inst = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))?;

        inst.polls = inst.polls.saturating_add(1);
        if inst.cloud_state == STATE_BUILD && inst.polls >= ready_after {
            inst.cloud_state = STATE_ACTIVE.to_string();
        }

        let mut out = Instance::new(
            instance_id,
            inst.resource_type,
            inst.cloud_state.clone(),
            InstanceStatus::Creating,
        );
        if inst.cloud_state != STATE_BUILD {
            out.allocation = inst.allocation;
        }
        out.details
            .insert("cloud".to_string(), self.cloud.name.clone());
        Ok(out)
    }

    async fn delete_instance(&self, _order: &Order, instance_id: &str) -> BrokerResult<()> {
        let mut st = self.cloud.state.lock();
        st.check_available()?;
        st.instances
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))?;
        st.rules.retain(|_, (target, _)| target != instance_id);
        Ok(())
    }

    fn is_ready(&self, cloud_state: &str) -> bool {
        matches!(
            cloud_state,
            STATE_ACTIVE | STATE_PAUSED | STATE_HIBERNATED | STATE_SHUTOFF
        )
    }

    fn has_failed(&self, cloud_state: &str) -> bool {
        cloud_state == STATE_ERROR
    }

    async fn lifecycle(
        &self,
        _order: &Order,
        instance_id: &str,
        op: &LifecycleOp,
    ) -> BrokerResult<()> {
        if self.resource_type != ResourceType::Compute {
            return Err(BrokerError::NotImplemented(format!(
                "{op:?} on {}",
                self.resource_type
            )));
        }
        let mut guard = self.cloud.state.lock();
        guard.check_available()?;
        let st = &mut *guard;
        let inst = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))?;

        let next = match op {
            LifecycleOp::Pause => STATE_PAUSED,
            LifecycleOp::Hibernate => STATE_HIBERNATED,
            LifecycleOp::Stop => STATE_SHUTOFF,
            LifecycleOp::Resume => STATE_ACTIVE,
            LifecycleOp::TakeSnapshot { name } => {
                let id = format!("snap-{instance_id}-{name}");
                st.images.insert(
                    id.clone(),
                    Image {
                        id,
                        name: name.clone(),
                        size_mb: 0,
                        min_disk_gb: 0,
                        min_ram_mb: 0,
                        status: "active".to_string(),
                    },
                );
                return Ok(());
            }
        };
        if inst.cloud_state == STATE_BUILD || inst.cloud_state == STATE_ERROR {
            return Err(BrokerError::UnacceptableOperation(format!(
                "instance {instance_id} is {}",
                inst.cloud_state
            )));
        }
        inst.cloud_state = next.to_string();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catalog and security rules
// ---------------------------------------------------------------------------

struct SimServices {
    cloud: SimCloud,
}

#[async_trait]
impl CloudServicesPlugin for SimServices {
    async fn get_all_images(&self, _user: &FederationUser) -> BrokerResult<Vec<ImageSummary>> {
        let st = self.cloud.state.lock();
        st.check_available()?;
        Ok(st
            .images
            .values()
            .map(|i| ImageSummary {
                id: i.id.clone(),
                name: i.name.clone(),
            })
            .collect())
    }

    async fn get_image(&self, image_id: &str, _user: &FederationUser) -> BrokerResult<Image> {
        let st = self.cloud.state.lock();
        st.check_available()?;
        st.images
            .get(image_id)
            .cloned()
            .ok_or_else(|| BrokerError::InstanceNotFound(format!("image {image_id}")))
    }

    async fn get_user_quota(&self, _user: &FederationUser) -> BrokerResult<Quota> {
        let st = self.cloud.state.lock();
        st.check_available()?;
        let mut used = ResourceAmounts::default();
        for i in st.instances.values() {
            match i.resource_type {
                ResourceType::Compute => {
                    used.instances += 1;
                    if let Some(a) = i.allocation {
                        used.vcpu += a.vcpu;
                        used.ram_mb += a.memory_mb;
                        used.disk_gb += a.disk_gb;
                    }
                }
                ResourceType::Volume => {
                    used.disk_gb += i.allocation.map(|a| a.disk_gb).unwrap_or(0);
                }
                ResourceType::Network => used.networks += 1,
                ResourceType::PublicIp => used.public_ips += 1,
                _ => {}
            }
        }
        let max = u32::try_from(self.cloud.settings.max_instances).unwrap_or(u32::MAX);
        let total = ResourceAmounts {
            vcpu: max.saturating_mul(8),
            ram_mb: u64::from(max) * 16_384,
            disk_gb: u64::from(max) * 500,
            instances: max,
            networks: max,
            public_ips: max,
        };
        Ok(Quota { total, used })
    }

    async fn create_security_rule(
        &self,
        _major: &Order,
        instance_id: &str,
        rule: &SecurityRule,
        _user: &FederationUser,
    ) -> BrokerResult<String> {
        if rule.port_from > rule.port_to {
            return Err(BrokerError::InvalidParameter(format!(
                "port range {}-{} is empty",
                rule.port_from, rule.port_to
            )));
        }
        let mut st = self.cloud.state.lock();
        st.check_available()?;
        if !st.instances.contains_key(instance_id) {
            return Err(BrokerError::InstanceNotFound(instance_id.to_string()));
        }
        let id = st.next_id("rule");
        st.rules.insert(
            id.clone(),
            (
                instance_id.to_string(),
                SecurityRuleInstance {
                    id: id.clone(),
                    rule: rule.clone(),
                },
            ),
        );
        Ok(id)
    }

    async fn delete_security_rule(&self, rule_id: &str, _user: &FederationUser) -> BrokerResult<()> {
        let mut st = self.cloud.state.lock();
        st.check_available()?;
        st.rules
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| BrokerError::InstanceNotFound(format!("security rule {rule_id}")))
    }

    async fn get_security_rules(
        &self,
        _major: &Order,
        instance_id: &str,
        _user: &FederationUser,
    ) -> BrokerResult<Vec<SecurityRuleInstance>> {
        let st = self.cloud.state.lock();
        st.check_available()?;
        Ok(st
            .rules
            .values()
            .filter(|(target, _)| target == instance_id)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
