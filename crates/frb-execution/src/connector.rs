//! One interface over "a cloud reachable from here", local or remote.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use frb_federation::RemoteClient;
use frb_schemas::{
    BrokerError, BrokerResult, FederationUser, Image, ImageSummary, Instance, InstanceStatus,
    LifecycleOp, Order, Quota, ResourceType, SecurityRule, SecurityRuleInstance,
};
use tracing::{debug, info};

use crate::plugin::{CloudServicesPlugin, ProvisioningPlugin};

#[async_trait]
pub trait CloudConnector: Send + Sync {
    /// Submit the order for provisioning. `None` when the instance id lives
    /// on another broker.
    async fn request_instance(&self, order: &Order) -> BrokerResult<Option<String>>;

    async fn get_instance(&self, order: &Order) -> BrokerResult<Instance>;

    /// Release whatever the order holds. Idempotent.
    async fn delete_instance(&self, order: &Order) -> BrokerResult<()>;

    async fn lifecycle(
        &self,
        order: &Order,
        user: &FederationUser,
        op: LifecycleOp,
    ) -> BrokerResult<()>;

    async fn get_all_images(
        &self,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Vec<ImageSummary>>;

    async fn get_image(
        &self,
        cloud_name: &str,
        image_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<Image>;

    async fn get_cloud_names(&self, user: &FederationUser) -> BrokerResult<Vec<String>>;

    async fn get_user_quota(&self, cloud_name: &str, user: &FederationUser)
        -> BrokerResult<Quota>;

    async fn create_security_rule(
        &self,
        major: &Order,
        rule: &SecurityRule,
        user: &FederationUser,
    ) -> BrokerResult<String>;

    async fn delete_security_rule(
        &self,
        cloud_name: &str,
        rule_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<()>;

    async fn get_all_security_rules(
        &self,
        major: &Order,
        user: &FederationUser,
    ) -> BrokerResult<Vec<SecurityRuleInstance>>;
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// The plugins of one named cloud.
pub struct CloudPlugins {
    provisioning: BTreeMap<ResourceType, Arc<dyn ProvisioningPlugin>>,
    services: Arc<dyn CloudServicesPlugin>,
}

impl CloudPlugins {
    pub fn new(services: Arc<dyn CloudServicesPlugin>) -> Self {
        Self {
            provisioning: BTreeMap::new(),
            services,
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn ProvisioningPlugin>) -> Self {
        self.provisioning.insert(plugin.resource_type(), plugin);
        self
    }
}

/// Clouds served by this broker.
#[derive(Default)]
pub struct LocalCloudConnector {
    clouds: BTreeMap<String, CloudPlugins>,
}

impl LocalCloudConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cloud(mut self, name: impl Into<String>, plugins: CloudPlugins) -> Self {
        self.clouds.insert(name.into(), plugins);
        self
    }

    pub fn has_cloud(&self, name: &str) -> bool {
        self.clouds.contains_key(name)
    }

    fn cloud(&self, name: &str) -> BrokerResult<&CloudPlugins> {
        self.clouds
            .get(name)
            .ok_or_else(|| BrokerError::InvalidParameter(format!("unknown cloud '{name}'")))
    }

    fn plugin_for(&self, order: &Order) -> BrokerResult<&Arc<dyn ProvisioningPlugin>> {
        let rt = order.resource_type();
        self.cloud(order.cloud_name())?
            .provisioning
            .get(&rt)
            .ok_or_else(|| {
                BrokerError::NotImplemented(format!(
                    "cloud '{}' cannot provision {rt}",
                    order.cloud_name()
                ))
            })
    }

    fn instance_id(order: &Order) -> BrokerResult<&str> {
        order.instance_id().ok_or_else(|| {
            BrokerError::InstanceNotFound(format!("order {} has no instance yet", order.id()))
        })
    }

    /// Security rules hang off a network or public ip order.
    fn rule_target(major: &Order) -> BrokerResult<&str> {
        match major.resource_type() {
            ResourceType::Network | ResourceType::PublicIp => Self::instance_id(major),
            other => Err(BrokerError::InvalidParameter(format!(
                "security rules cannot be attached to a {other} order"
            ))),
        }
    }
}

#[async_trait]
impl CloudConnector for LocalCloudConnector {
    async fn request_instance(&self, order: &Order) -> BrokerResult<Option<String>> {
        let id = self.plugin_for(order)?.request_instance(order).await?;
        info!(order_id = %order.id(), instance_id = %id, cloud = %order.cloud_name(), "instance requested");
        Ok(Some(id))
    }

    async fn get_instance(&self, order: &Order) -> BrokerResult<Instance> {
        let plugin = self.plugin_for(order)?;
        let mut inst = plugin
            .get_instance(order, Self::instance_id(order)?)
            .await?;
        inst.status = if plugin.is_ready(&inst.cloud_state) {
            InstanceStatus::Ready
        } else if plugin.has_failed(&inst.cloud_state) {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Creating
        };
        Ok(inst)
    }

    async fn delete_instance(&self, order: &Order) -> BrokerResult<()> {
        let Some(instance_id) = order.instance_id() else {
            debug!(order_id = %order.id(), "nothing provisioned; delete is a no-op");
            return Ok(());
        };
        match self
            .plugin_for(order)?
            .delete_instance(order, instance_id)
            .await
        {
            Ok(()) | Err(BrokerError::InstanceNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn lifecycle(
        &self,
        order: &Order,
        _user: &FederationUser,
        op: LifecycleOp,
    ) -> BrokerResult<()> {
        if order.resource_type() != ResourceType::Compute {
            return Err(BrokerError::InvalidParameter(format!(
                "{op:?} applies to compute orders only"
            )));
        }
        self.plugin_for(order)?
            .lifecycle(order, Self::instance_id(order)?, &op)
            .await
    }

    async fn get_all_images(
        &self,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Vec<ImageSummary>> {
        self.cloud(cloud_name)?.services.get_all_images(user).await
    }

    async fn get_image(
        &self,
        cloud_name: &str,
        image_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<Image> {
        self.cloud(cloud_name)?.services.get_image(image_id, user).await
    }

    async fn get_cloud_names(&self, _user: &FederationUser) -> BrokerResult<Vec<String>> {
        Ok(self.clouds.keys().cloned().collect())
    }

    async fn get_user_quota(
        &self,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Quota> {
        self.cloud(cloud_name)?.services.get_user_quota(user).await
    }

    async fn create_security_rule(
        &self,
        major: &Order,
        rule: &SecurityRule,
        user: &FederationUser,
    ) -> BrokerResult<String> {
        let target = Self::rule_target(major)?;
        self.cloud(major.cloud_name())?
            .services
            .create_security_rule(major, target, rule, user)
            .await
    }

    async fn delete_security_rule(
        &self,
        cloud_name: &str,
        rule_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<()> {
        self.cloud(cloud_name)?
            .services
            .delete_security_rule(rule_id, user)
            .await
    }

    async fn get_all_security_rules(
        &self,
        major: &Order,
        user: &FederationUser,
    ) -> BrokerResult<Vec<SecurityRuleInstance>> {
        let target = Self::rule_target(major)?;
        self.cloud(major.cloud_name())?
            .services
            .get_security_rules(major, target, user)
            .await
    }
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

/// Clouds of one peer broker, reached over the federation link.
pub struct RemoteCloudConnector {
    provider: String,
    client: RemoteClient,
}

impl RemoteCloudConnector {
    pub fn new(provider: impl Into<String>, client: RemoteClient) -> Self {
        Self {
            provider: provider.into(),
            client,
        }
    }
}

#[async_trait]
impl CloudConnector for RemoteCloudConnector {
    async fn request_instance(&self, order: &Order) -> BrokerResult<Option<String>> {
        self.client.create_order(order).await?;
        info!(order_id = %order.id(), provider = %self.provider, "order handed to providing member");
        Ok(None)
    }

    async fn get_instance(&self, order: &Order) -> BrokerResult<Instance> {
        self.client.get_instance(order).await
    }

    async fn delete_instance(&self, order: &Order) -> BrokerResult<()> {
        match self.client.delete_order(order).await {
            // Already gone on the provider.
            Ok(()) | Err(BrokerError::InstanceNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn lifecycle(
        &self,
        order: &Order,
        user: &FederationUser,
        op: LifecycleOp,
    ) -> BrokerResult<()> {
        self.client.lifecycle(order, user, op).await
    }

    async fn get_all_images(
        &self,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Vec<ImageSummary>> {
        self.client
            .get_all_images(&self.provider, cloud_name, user)
            .await
    }

    async fn get_image(
        &self,
        cloud_name: &str,
        image_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<Image> {
        self.client
            .get_image(&self.provider, cloud_name, image_id, user)
            .await
    }

    async fn get_cloud_names(&self, user: &FederationUser) -> BrokerResult<Vec<String>> {
        self.client.get_cloud_names(&self.provider, user).await
    }

    async fn get_user_quota(
        &self,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Quota> {
        self.client
            .get_user_quota(&self.provider, cloud_name, user)
            .await
    }

    async fn create_security_rule(
        &self,
        major: &Order,
        rule: &SecurityRule,
        user: &FederationUser,
    ) -> BrokerResult<String> {
        self.client.create_security_rule(major, rule, user).await
    }

    async fn delete_security_rule(
        &self,
        cloud_name: &str,
        rule_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<()> {
        self.client
            .delete_security_rule(&self.provider, cloud_name, rule_id, user)
            .await
    }

    async fn get_all_security_rules(
        &self,
        major: &Order,
        user: &FederationUser,
    ) -> BrokerResult<Vec<SecurityRuleInstance>> {
        self.client.get_all_security_rules(major, user).await
    }
}
