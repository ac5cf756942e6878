//! Inbound side of the federation link: what a peer broker may ask of us.

use std::sync::Arc;

use async_trait::async_trait;
use frb_federation::{RemoteCall, RemoteReply, RemoteRequestHandler};
use frb_schemas::{BrokerError, BrokerResult, FederationUser, Order, OrderId, ResourceType};
use tracing::{debug, info};

use crate::controller::OrderController;

pub struct RemoteFacade {
    controller: Arc<OrderController>,
}

impl RemoteFacade {
    pub fn new(controller: Arc<OrderController>) -> Self {
        Self { controller }
    }

    fn local_id(&self) -> &str {
        self.controller.local_id()
    }

    async fn create_order(&self, from: &str, order: Order) -> BrokerResult<RemoteReply> {
        if order.requester() != from {
            return Err(BrokerError::InvalidParameter(format!(
                "order {} is requested by {}, not {from}",
                order.id(),
                order.requester()
            )));
        }
        if !order.is_provided_by(self.local_id()) {
            return Err(BrokerError::InvalidParameter(format!(
                "order {} is provided by {}, not {}",
                order.id(),
                order.provider(),
                self.local_id()
            )));
        }

        // A requester retrying after a lost reply gets the same answer.
        if let Some(existing) = self.controller.lookup(order.id()).await? {
            if existing.requester() == from {
                debug!(order_id = %order.id(), requester = %from, "duplicate create-order acknowledged");
                return Ok(RemoteReply::Empty);
            }
            return Err(BrokerError::InvalidParameter(format!(
                "order id {} already in use",
                order.id()
            )));
        }

        let id = self.controller.activate(order).await?;
        info!(order_id = %id, requester = %from, "remote order accepted");
        Ok(RemoteReply::Empty)
    }

    /// An order this broker provides for `from`, owned by `user`.
    async fn served_order(
        &self,
        from: &str,
        id: OrderId,
        resource_type: Option<ResourceType>,
        user: &FederationUser,
    ) -> BrokerResult<Order> {
        let not_found = || BrokerError::InstanceNotFound(format!("order {id} not found"));
        let order = self.controller.lookup(id).await?.ok_or_else(not_found)?;
        if order.requester() != from || !order.is_provided_by(self.local_id()) {
            return Err(not_found());
        }
        if resource_type.is_some_and(|rt| rt != order.resource_type()) {
            return Err(not_found());
        }
        if !order.user().same_owner(user) {
            return Err(BrokerError::Unauthorized(format!(
                "user {} does not own order {id}",
                user.user_id
            )));
        }
        Ok(order)
    }

    async fn serve(&self, from: &str, call: RemoteCall) -> BrokerResult<RemoteReply> {
        let local = self.local_id().to_string();
        let c = &self.controller;
        match call {
            RemoteCall::CreateOrder { order } => self.create_order(from, order).await,

            RemoteCall::DeleteOrder {
                order_id,
                resource_type,
                user,
            } => {
                self.served_order(from, order_id, Some(resource_type), &user)
                    .await?;
                c.delete_order(order_id, &user).await?;
                Ok(RemoteReply::Empty)
            }

            RemoteCall::GetOrder {
                order_id,
                resource_type,
                user,
            } => {
                let order = self
                    .served_order(from, order_id, Some(resource_type), &user)
                    .await?;
                Ok(RemoteReply::Order(order))
            }

            RemoteCall::GetInstance {
                order_id,
                resource_type,
                user,
            } => {
                let order = self
                    .served_order(from, order_id, Some(resource_type), &user)
                    .await?;
                Ok(RemoteReply::Instance(c.instance_of(&order).await?))
            }

            RemoteCall::GetAllImages { cloud_name, user } => Ok(RemoteReply::Images(
                c.get_all_images(&local, &cloud_name, &user).await?,
            )),

            RemoteCall::GetImage {
                cloud_name,
                image_id,
                user,
            } => Ok(RemoteReply::Image(
                c.get_image(&local, &cloud_name, &image_id, &user).await?,
            )),

            RemoteCall::GetCloudNames { user } => Ok(RemoteReply::CloudNames(
                c.get_cloud_names(&local, &user).await?,
            )),

            RemoteCall::GetUserQuota { cloud_name, user } => Ok(RemoteReply::Quota(
                c.get_user_quota(&local, &cloud_name, &user).await?,
            )),

            RemoteCall::NotifyEvent {
                order_id,
                new_state,
            } => {
                c.handle_remote_event(from, order_id, new_state).await?;
                Ok(RemoteReply::Empty)
            }

            RemoteCall::CreateSecurityRule {
                order_id,
                rule,
                user,
            } => {
                self.served_order(from, order_id, None, &user).await?;
                Ok(RemoteReply::RuleId(
                    c.create_security_rule(order_id, &rule, &user).await?,
                ))
            }

            RemoteCall::DeleteSecurityRule {
                cloud_name,
                rule_id,
                user,
            } => {
                c.delete_security_rule(&local, &cloud_name, &rule_id, &user)
                    .await?;
                Ok(RemoteReply::Empty)
            }

            RemoteCall::GetAllSecurityRules { order_id, user } => {
                self.served_order(from, order_id, None, &user).await?;
                Ok(RemoteReply::SecurityRules(
                    c.get_all_security_rules(order_id, &user).await?,
                ))
            }

            RemoteCall::Lifecycle { order_id, user, op } => {
                self.served_order(from, order_id, Some(ResourceType::Compute), &user)
                    .await?;
                c.lifecycle(order_id, &user, op).await?;
                Ok(RemoteReply::Empty)
            }
        }
    }
}

#[async_trait]
impl RemoteRequestHandler for RemoteFacade {
    async fn handle(&self, from: &str, call: RemoteCall) -> anyhow::Result<RemoteReply> {
        let method = call.method();
        debug!(peer = %from, %method, "serving remote call");
        Ok(self.serve(from, call).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frb_cloud_sim::{SimCloud, SimSettings};
    use frb_db::MemoryStorage;
    use frb_execution::{LocalCloudConnector, ProviderDispatcher};
    use frb_orders::OrderRegistry;
    use frb_schemas::{OrderState, ResourceSpec, VolumeSpec};

    fn facade() -> RemoteFacade {
        let cloud = SimCloud::new("sim", SimSettings::default());
        let local = LocalCloudConnector::new().with_cloud("sim", cloud.plugins());
        let dispatcher = Arc::new(ProviderDispatcher::new("b", Arc::new(local), None));
        let registry = Arc::new(OrderRegistry::new(Arc::new(MemoryStorage::new())));
        RemoteFacade::new(Arc::new(OrderController::new(registry, dispatcher, "sim")))
    }

    fn bob() -> FederationUser {
        FederationUser::new("bob", "idp", "Bob")
    }

    fn remote_volume() -> Order {
        Order::new(
            "a",
            "b",
            "sim",
            bob(),
            ResourceSpec::Volume(VolumeSpec {
                name: "v".into(),
                size_gb: 2,
            }),
        )
    }

    fn kind(r: anyhow::Result<RemoteReply>) -> frb_schemas::ErrorKind {
        r.unwrap_err()
            .downcast_ref::<BrokerError>()
            .map(BrokerError::kind)
            .unwrap()
    }

    #[tokio::test]
    async fn create_is_idempotent_for_the_same_requester() {
        let f = facade();
        let order = remote_volume();
        let call = RemoteCall::CreateOrder {
            order: order.clone(),
        };
        assert_eq!(f.handle("a", call.clone()).await.unwrap(), RemoteReply::Empty);
        assert_eq!(f.handle("a", call).await.unwrap(), RemoteReply::Empty);
        assert_eq!(f.controller.registry().len(), 1);
        assert_eq!(
            f.controller.registry().get(order.id()).unwrap().state(),
            OrderState::Open
        );
    }

    #[tokio::test]
    async fn create_checks_requester_and_provider() {
        let f = facade();
        let order = remote_volume();
        assert_eq!(
            kind(f.handle("c", RemoteCall::CreateOrder { order }).await),
            frb_schemas::ErrorKind::InvalidParameter
        );

        let elsewhere = Order::new(
            "a",
            "c",
            "sim",
            bob(),
            ResourceSpec::Volume(VolumeSpec {
                name: "v".into(),
                size_gb: 2,
            }),
        );
        assert_eq!(
            kind(f.handle("a", RemoteCall::CreateOrder { order: elsewhere }).await),
            frb_schemas::ErrorKind::InvalidParameter
        );
    }

    #[tokio::test]
    async fn lookups_hide_orders_of_other_requesters_and_types() {
        let f = facade();
        let order = remote_volume();
        f.handle("a", RemoteCall::CreateOrder { order: order.clone() })
            .await
            .unwrap();

        let get = |from: &'static str, rt: ResourceType, user: FederationUser| {
            f.handle(
                from,
                RemoteCall::GetOrder {
                    order_id: order.id(),
                    resource_type: rt,
                    user,
                },
            )
        };

        match get("a", ResourceType::Volume, bob()).await.unwrap() {
            RemoteReply::Order(o) => assert_eq!(o.id(), order.id()),
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(
            kind(get("c", ResourceType::Volume, bob()).await),
            frb_schemas::ErrorKind::InstanceNotFound
        );
        assert_eq!(
            kind(get("a", ResourceType::Compute, bob()).await),
            frb_schemas::ErrorKind::InstanceNotFound
        );
        assert_eq!(
            kind(get("a", ResourceType::Volume, FederationUser::new("eve", "idp", "E")).await),
            frb_schemas::ErrorKind::Unauthorized
        );
    }

    #[tokio::test]
    async fn catalog_calls_serve_local_clouds() {
        let f = facade();
        let reply = f
            .handle("a", RemoteCall::GetCloudNames { user: bob() })
            .await
            .unwrap();
        assert_eq!(reply, RemoteReply::CloudNames(vec!["sim".to_string()]));
    }
}
