//! Cloud plugin contracts.
//!
//! A cloud is a set of [`ProvisioningPlugin`]s, one per resource type, plus
//! one [`CloudServicesPlugin`] for the read-only catalog and security rules.
//! Plugins receive the order's federated user as their credentials handle.

use async_trait::async_trait;
use frb_schemas::{
    BrokerError, BrokerResult, FederationUser, Image, ImageSummary, Instance, LifecycleOp, Order,
    Quota, ResourceType, SecurityRule, SecurityRuleInstance,
};

fn not_implemented(what: &str) -> BrokerError {
    BrokerError::NotImplemented(format!("{what} is not supported by this cloud"))
}

#[async_trait]
pub trait ProvisioningPlugin: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Start provisioning. Returns the cloud's instance id.
    async fn request_instance(&self, order: &Order) -> BrokerResult<String>;

    async fn get_instance(&self, order: &Order, instance_id: &str) -> BrokerResult<Instance>;

    async fn delete_instance(&self, order: &Order, instance_id: &str) -> BrokerResult<()>;

    /// Interpret a raw cloud state string.
    fn is_ready(&self, cloud_state: &str) -> bool;

    fn has_failed(&self, cloud_state: &str) -> bool;

    async fn lifecycle(
        &self,
        _order: &Order,
        _instance_id: &str,
        op: &LifecycleOp,
    ) -> BrokerResult<()> {
        Err(not_implemented(&format!("{op:?}")))
    }
}

#[async_trait]
pub trait CloudServicesPlugin: Send + Sync {
    async fn get_all_images(&self, _user: &FederationUser) -> BrokerResult<Vec<ImageSummary>> {
        Err(not_implemented("image listing"))
    }

    async fn get_image(&self, _image_id: &str, _user: &FederationUser) -> BrokerResult<Image> {
        Err(not_implemented("image lookup"))
    }

    async fn get_user_quota(&self, _user: &FederationUser) -> BrokerResult<Quota> {
        Err(not_implemented("quota lookup"))
    }

    /// Install `rule` on the network or public ip backing `instance_id`.
    async fn create_security_rule(
        &self,
        _major: &Order,
        _instance_id: &str,
        _rule: &SecurityRule,
        _user: &FederationUser,
    ) -> BrokerResult<String> {
        Err(not_implemented("security rules"))
    }

    async fn delete_security_rule(
        &self,
        _rule_id: &str,
        _user: &FederationUser,
    ) -> BrokerResult<()> {
        Err(not_implemented("security rules"))
    }

    async fn get_security_rules(
        &self,
        _major: &Order,
        _instance_id: &str,
        _user: &FederationUser,
    ) -> BrokerResult<Vec<SecurityRuleInstance>> {
        Err(not_implemented("security rules"))
    }
}

/// A cloud that offers no catalog services at all.
pub struct NoCloudServices;

impl CloudServicesPlugin for NoCloudServices {}
