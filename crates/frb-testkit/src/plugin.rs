//! A provisioning plugin driven by a script instead of a cloud.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use frb_execution::{CloudPlugins, NoCloudServices, ProvisioningPlugin};
use frb_schemas::{BrokerError, BrokerResult, Instance, InstanceStatus, Order, ResourceType};
use parking_lot::Mutex;

pub const SCRIPT_BUILDING: &str = "BUILDING";
pub const SCRIPT_READY: &str = "READY";
pub const SCRIPT_FAILED: &str = "FAILED";

#[derive(Default)]
struct Script {
    seq: u64,
    /// Errors returned by the next `request_instance` calls, in order.
    request_errors: VecDeque<BrokerError>,
    /// Errors returned by the next `get_instance` calls, in order.
    poll_errors: VecDeque<BrokerError>,
    /// States reported for every new instance; the last one sticks.
    states: Vec<String>,
    instances: BTreeMap<String, VecDeque<String>>,
    requested: Vec<String>,
    deleted: Vec<String>,
}

/// Every new instance walks through the same scripted cloud states.
#[derive(Clone)]
pub struct ScriptedPlugin {
    resource_type: ResourceType,
    script: Arc<Mutex<Script>>,
}

impl ScriptedPlugin {
    /// Instances report `states` one per poll, then stay on the last one.
    pub fn new(resource_type: ResourceType, states: &[&str]) -> Self {
        let script = Script {
            states: states.iter().map(|s| s.to_string()).collect(),
            ..Script::default()
        };
        Self {
            resource_type,
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// A cloud holding only this plugin.
    pub fn plugins(&self) -> CloudPlugins {
        CloudPlugins::new(Arc::new(NoCloudServices)).with_plugin(Arc::new(self.clone()))
    }

    pub fn fail_next_request(&self, err: BrokerError) {
        self.script.lock().request_errors.push_back(err);
    }

    pub fn fail_next_poll(&self, err: BrokerError) {
        self.script.lock().poll_errors.push_back(err);
    }

    pub fn requested(&self) -> Vec<String> {
        self.script.lock().requested.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.script.lock().deleted.clone()
    }
}

#[async_trait]
impl ProvisioningPlugin for ScriptedPlugin {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    async fn request_instance(&self, order: &Order) -> BrokerResult<String> {
        let mut s = self.script.lock();
        if let Some(e) = s.request_errors.pop_front() {
            return Err(e);
        }
        s.seq += 1;
        let id = format!("scripted-{}-{}", order.resource_type(), s.seq);
        let states = s.states.iter().cloned().collect();
        s.instances.insert(id.clone(), states);
        s.requested.push(id.clone());
        Ok(id)
    }

    async fn get_instance(&self, _order: &Order, id: &str) -> BrokerResult<Instance> {
        let mut s = self.script.lock();
        if let Some(e) = s.poll_errors.pop_front() {
            return Err(e);
        }
        let states = s
            .instances
            .get_mut(id)
            .ok_or_else(|| BrokerError::InstanceNotFound(id.to_string()))?;
        let state = if states.len() > 1 {
            states.pop_front().unwrap_or_default()
        } else {
            states.front().cloned().unwrap_or_default()
        };
        Ok(Instance::new(
            id,
            self.resource_type,
            state,
            InstanceStatus::Creating,
        ))
    }

    async fn delete_instance(&self, _order: &Order, id: &str) -> BrokerResult<()> {
        let mut s = self.script.lock();
        if s.instances.remove(id).is_none() {
            return Err(BrokerError::InstanceNotFound(id.to_string()));
        }
        s.deleted.push(id.to_string());
        Ok(())
    }

    fn is_ready(&self, cloud_state: &str) -> bool {
        cloud_state == SCRIPT_READY
    }

    fn has_failed(&self, cloud_state: &str) -> bool {
        cloud_state == SCRIPT_FAILED
    }
}
