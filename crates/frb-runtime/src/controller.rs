//! Request-path operations on orders: create, look up, delete, lifecycle,
//! catalog and security rules. Workers own state progression; this type
//! only activates orders, answers lookups and applies administrative or
//! peer-reported events through the same compare-and-set commit.

use std::sync::Arc;

use frb_execution::{CloudConnector, ProviderDispatcher};
use frb_orders::{OrderRegistry, RegistryError};
use frb_schemas::{
    BrokerError, BrokerResult, FederationUser, Image, ImageSummary, Instance, InstanceStatus,
    LifecycleOp, Order, OrderEvent, OrderId, OrderState, Quota, ResourceSpec, SecurityRule,
    SecurityRuleInstance,
};
use tracing::{debug, info};

/// Attempts for a request-path commit that keeps losing to a worker.
const COMMIT_ATTEMPTS: usize = 3;

pub struct OrderController {
    registry: Arc<OrderRegistry>,
    dispatcher: Arc<ProviderDispatcher>,
    default_cloud: String,
}

impl OrderController {
    pub fn new(
        registry: Arc<OrderRegistry>,
        dispatcher: Arc<ProviderDispatcher>,
        default_cloud: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            default_cloud: default_cloud.into(),
        }
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ProviderDispatcher> {
        &self.dispatcher
    }

    pub fn local_id(&self) -> &str {
        self.dispatcher.local_id()
    }

    /// A fresh OPEN order requested by this broker. `provider` and `cloud`
    /// default to the local broker and its default cloud.
    pub fn new_order(
        &self,
        user: FederationUser,
        spec: ResourceSpec,
        provider: Option<&str>,
        cloud: Option<&str>,
    ) -> Order {
        Order::new(
            self.local_id(),
            provider.unwrap_or(self.local_id()),
            cloud.unwrap_or(&self.default_cloud),
            user,
            spec,
        )
    }

    // -----------------------------------------------------------------------
    // Create / lookup
    // -----------------------------------------------------------------------

    /// Durably record an OPEN order and hand it to the workers.
    pub async fn activate(&self, order: Order) -> BrokerResult<OrderId> {
        if order.is_provided_by(self.local_id()) {
            if !self.dispatcher.local().has_cloud(order.cloud_name()) {
                return Err(BrokerError::InvalidParameter(format!(
                    "unknown cloud '{}'",
                    order.cloud_name()
                )));
            }
        } else {
            // Fail fast when the provider cannot be reached at all.
            self.dispatcher.for_order(&order)?;
        }

        let id = order.id();
        let provider = order.provider().to_string();
        self.registry.activate(order).await?;
        info!(order_id = %id, %provider, "order opened");
        Ok(id)
    }

    /// Active orders come from the registry, settled ones from storage.
    pub async fn lookup(&self, id: OrderId) -> BrokerResult<Option<Order>> {
        if let Some(o) = self.registry.get(id) {
            return Ok(Some(o));
        }
        self.registry
            .storage()
            .load(id)
            .await
            .map_err(|e| BrokerError::InternalServer(e.to_string()))
    }

    pub async fn get_order(&self, id: OrderId, user: &FederationUser) -> BrokerResult<Order> {
        let order = self
            .lookup(id)
            .await?
            .ok_or_else(|| BrokerError::InstanceNotFound(format!("order {id} not found")))?;
        check_owner(&order, user)?;
        Ok(order)
    }

    pub async fn get_instance(&self, id: OrderId, user: &FederationUser) -> BrokerResult<Instance> {
        let order = self.get_order(id, user).await?;
        self.instance_of(&order).await
    }

    /// What the order currently holds in its cloud.
    pub async fn instance_of(&self, order: &Order) -> BrokerResult<Instance> {
        match order.state() {
            OrderState::Closed => Err(BrokerError::InstanceNotFound(format!(
                "order {} is closed",
                order.id()
            ))),
            OrderState::Failed => {
                let mut i = Instance::new(
                    order.instance_id().unwrap_or_default(),
                    order.resource_type(),
                    "FAILED",
                    InstanceStatus::Failed,
                );
                if let Some(msg) = order.fault_message() {
                    i.details.insert("fault".to_string(), msg.to_string());
                }
                Ok(i)
            }
            OrderState::Open => Ok(pending_instance(order)),
            OrderState::Spawning | OrderState::Fulfilled => {
                if order.is_provided_by(self.local_id()) && order.instance_id().is_none() {
                    return Ok(pending_instance(order));
                }
                self.dispatcher.for_order(order)?.get_instance(order).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// FULFILLED and FAILED orders release their instance and close now.
    /// OPEN and SPAWNING orders fail and the FAILED worker releases them.
    pub async fn delete_order(&self, id: OrderId, user: &FederationUser) -> BrokerResult<()> {
        for _ in 0..COMMIT_ATTEMPTS {
            let order = self.registry.get(id).ok_or_else(|| {
                BrokerError::InstanceNotFound(format!("order {id} not found or already closed"))
            })?;
            check_owner(&order, user)?;

            let from = order.state();
            if matches!(from, OrderState::Fulfilled | OrderState::Failed) {
                self.dispatcher
                    .for_order(&order)?
                    .delete_instance(&order)
                    .await?;
            }

            let mut next = order;
            next.apply(&OrderEvent::DeletionRequested)
                .map_err(|e| BrokerError::UnacceptableOperation(e.to_string()))?;

            match self.registry.commit(&next, from).await {
                Ok(()) => {
                    info!(order_id = %id, %from, to = %next.state(), "order deletion applied");
                    return Ok(());
                }
                Err(RegistryError::Stale { actual, .. }) => {
                    debug!(order_id = %id, %from, %actual, "order moved during deletion; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BrokerError::UnacceptableOperation(format!(
            "order {id} kept changing state; deletion not applied"
        )))
    }

    // -----------------------------------------------------------------------
    // Lifecycle, catalog and security rules
    // -----------------------------------------------------------------------

    pub async fn lifecycle(
        &self,
        id: OrderId,
        user: &FederationUser,
        op: LifecycleOp,
    ) -> BrokerResult<()> {
        let order = self.fulfilled(id, user).await?;
        self.dispatcher
            .for_order(&order)?
            .lifecycle(&order, user, op)
            .await
    }

    pub async fn get_all_images(
        &self,
        provider: &str,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Vec<ImageSummary>> {
        self.connector(provider)?
            .get_all_images(cloud_name, user)
            .await
    }

    pub async fn get_image(
        &self,
        provider: &str,
        cloud_name: &str,
        image_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<Image> {
        self.connector(provider)?
            .get_image(cloud_name, image_id, user)
            .await
    }

    pub async fn get_cloud_names(
        &self,
        provider: &str,
        user: &FederationUser,
    ) -> BrokerResult<Vec<String>> {
        self.connector(provider)?.get_cloud_names(user).await
    }

    pub async fn get_user_quota(
        &self,
        provider: &str,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Quota> {
        self.connector(provider)?
            .get_user_quota(cloud_name, user)
            .await
    }

    /// Attach `rule` to the network or public ip held by `major_id`.
    pub async fn create_security_rule(
        &self,
        major_id: OrderId,
        rule: &SecurityRule,
        user: &FederationUser,
    ) -> BrokerResult<String> {
        let major = self.fulfilled(major_id, user).await?;
        let rule_id = self
            .dispatcher
            .for_order(&major)?
            .create_security_rule(&major, rule, user)
            .await?;
        info!(order_id = %major_id, %rule_id, "security rule created");
        Ok(rule_id)
    }

    pub async fn delete_security_rule(
        &self,
        provider: &str,
        cloud_name: &str,
        rule_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<()> {
        self.connector(provider)?
            .delete_security_rule(cloud_name, rule_id, user)
            .await
    }

    pub async fn get_all_security_rules(
        &self,
        major_id: OrderId,
        user: &FederationUser,
    ) -> BrokerResult<Vec<SecurityRuleInstance>> {
        let major = self.fulfilled(major_id, user).await?;
        self.dispatcher
            .for_order(&major)?
            .get_all_security_rules(&major, user)
            .await
    }

    // -----------------------------------------------------------------------
    // Peer-reported events
    // -----------------------------------------------------------------------

    /// The providing broker reports that `order_id` settled on its side.
    pub async fn handle_remote_event(
        &self,
        from: &str,
        order_id: OrderId,
        new_state: OrderState,
    ) -> BrokerResult<()> {
        if !matches!(new_state, OrderState::Fulfilled | OrderState::Failed) {
            return Err(BrokerError::InvalidParameter(format!(
                "unexpected notified state {new_state}"
            )));
        }

        for _ in 0..COMMIT_ATTEMPTS {
            let order = self.registry.get(order_id).ok_or_else(|| {
                BrokerError::InstanceNotFound(format!("order {order_id} is not active"))
            })?;
            if order.provider() != from || order.is_provided_by(self.local_id()) {
                return Err(BrokerError::InvalidParameter(format!(
                    "{from} does not provide order {order_id}"
                )));
            }

            let from_state = order.state();
            let event = match (new_state, from_state) {
                (OrderState::Fulfilled, OrderState::Fulfilled)
                | (OrderState::Failed, OrderState::Failed) => return Ok(()),
                // The provider finished before our OPEN worker recorded the
                // hand-off. Record it first; the next attempt sees SPAWNING.
                (OrderState::Fulfilled, OrderState::Open) => {
                    OrderEvent::Submitted { instance_id: None }
                }
                (OrderState::Fulfilled, OrderState::Spawning) => OrderEvent::InstanceReady {
                    allocation: None,
                    at: chrono::Utc::now(),
                },
                (OrderState::Failed, OrderState::Open) => OrderEvent::Rejected {
                    reason: format!("providing member {from} reported failure"),
                },
                (OrderState::Failed, _) => OrderEvent::InstanceFailed {
                    reason: format!("providing member {from} reported failure"),
                },
                (_, other) => {
                    return Err(BrokerError::UnacceptableOperation(format!(
                        "order {order_id} is {other}; cannot become {new_state}"
                    )))
                }
            };

            let mut next = order;
            next.apply(&event)
                .map_err(|e| BrokerError::UnacceptableOperation(e.to_string()))?;
            match self.registry.commit(&next, from_state).await {
                Ok(()) if next.state() == new_state => {
                    info!(order_id = %order_id, provider = %from, state = %new_state, "remote event applied");
                    return Ok(());
                }
                Ok(()) => continue,
                Err(RegistryError::Stale { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(BrokerError::UnacceptableOperation(format!(
            "order {order_id} kept changing state; event not applied"
        )))
    }

    // -----------------------------------------------------------------------

    fn connector(&self, provider: &str) -> BrokerResult<Arc<dyn CloudConnector>> {
        self.dispatcher.for_provider(provider)
    }

    async fn fulfilled(&self, id: OrderId, user: &FederationUser) -> BrokerResult<Order> {
        let order = self.get_order(id, user).await?;
        if order.state() != OrderState::Fulfilled {
            return Err(BrokerError::UnacceptableOperation(format!(
                "order {id} is {}, not FULFILLED",
                order.state()
            )));
        }
        Ok(order)
    }
}

fn check_owner(order: &Order, user: &FederationUser) -> BrokerResult<()> {
    if order.user().same_owner(user) {
        Ok(())
    } else {
        Err(BrokerError::Unauthorized(format!(
            "user {} does not own order {}",
            user.user_id,
            order.id()
        )))
    }
}

fn pending_instance(order: &Order) -> Instance {
    Instance::new(
        order.instance_id().unwrap_or_default(),
        order.resource_type(),
        "PENDING",
        InstanceStatus::Creating,
    )
}
