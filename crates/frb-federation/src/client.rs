//! Outbound side: blocking-style calls over the asynchronous transport.

use std::sync::Arc;
use std::time::Duration;

use frb_schemas::{
    BrokerError, BrokerResult, FederationUser, Image, ImageSummary, Instance, LifecycleOp, Order,
    OrderId, OrderState, Quota, ResourceType, SecurityRule, SecurityRuleInstance,
};
use tracing::{debug, warn};

use crate::call::{RemoteCall, RemoteReply};
use crate::correlation::PendingCalls;
use crate::errors::error_for;
use crate::message::{Outcome, Packet, RemoteRequest, RequestId};
use crate::transport::PacketTransport;

/// Issues requests on behalf of the local broker and waits for the matching
/// response, at most `timeout` per call.
#[derive(Clone)]
pub struct RemoteClient {
    local: String,
    transport: Arc<dyn PacketTransport>,
    pending: Arc<PendingCalls>,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(
        local: impl Into<String>,
        transport: Arc<dyn PacketTransport>,
        pending: Arc<PendingCalls>,
        timeout: Duration,
    ) -> Self {
        Self {
            local: local.into(),
            transport,
            pending,
            timeout,
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    fn unavailable(provider: &str) -> BrokerError {
        BrokerError::UnavailableProvider(format!(
            "unable to retrieve response from providing member {provider}"
        ))
    }

    /// Send `call` to `provider` and wait for its reply.
    ///
    /// Timeouts and delivery failures surface as `UnavailableProvider`; a
    /// remote error condition is mapped back to its local kind.
    pub async fn call(&self, provider: &str, call: RemoteCall) -> BrokerResult<RemoteReply> {
        let (method, fields) = call
            .encode()
            .map_err(|e| BrokerError::Communication(e.to_string()))?;

        let id = RequestId::new();
        let rx = self.pending.register(id);
        let packet = Packet::Request(RemoteRequest {
            id,
            method,
            from: self.local.clone(),
            to: provider.to_string(),
            fields,
        });

        debug!(request_id = %id, %method, %provider, "remote call");
        if let Err(e) = self.transport.send(packet).await {
            self.pending.cancel(id);
            warn!(request_id = %id, %method, %provider, error = %e, "remote send failed");
            return Err(Self::unavailable(provider));
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(r)) => r,
            Ok(Err(_)) | Err(_) => {
                self.pending.cancel(id);
                warn!(request_id = %id, %method, %provider, "remote call timed out");
                return Err(Self::unavailable(provider));
            }
        };

        match response.outcome {
            Outcome::Ok { fields } => RemoteReply::decode(method, &fields)
                .map_err(|e| BrokerError::Communication(e.to_string())),
            Outcome::Err { condition, message } => Err(error_for(condition, message)),
        }
    }

    async fn expect_empty(&self, provider: &str, call: RemoteCall) -> BrokerResult<()> {
        match self.call(provider, call).await? {
            RemoteReply::Empty => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    // -----------------------------------------------------------------------
    // Typed requesters
    // -----------------------------------------------------------------------

    pub async fn create_order(&self, order: &Order) -> BrokerResult<()> {
        self.expect_empty(
            order.provider(),
            RemoteCall::CreateOrder {
                order: order.clone(),
            },
        )
        .await
    }

    pub async fn delete_order(&self, order: &Order) -> BrokerResult<()> {
        self.expect_empty(
            order.provider(),
            RemoteCall::DeleteOrder {
                order_id: order.id(),
                resource_type: order.resource_type(),
                user: order.user().clone(),
            },
        )
        .await
    }

    pub async fn get_order(
        &self,
        provider: &str,
        order_id: OrderId,
        resource_type: ResourceType,
        user: &FederationUser,
    ) -> BrokerResult<Order> {
        let call = RemoteCall::GetOrder {
            order_id,
            resource_type,
            user: user.clone(),
        };
        match self.call(provider, call).await? {
            RemoteReply::Order(o) => Ok(o),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_instance(&self, order: &Order) -> BrokerResult<Instance> {
        let call = RemoteCall::GetInstance {
            order_id: order.id(),
            resource_type: order.resource_type(),
            user: order.user().clone(),
        };
        match self.call(order.provider(), call).await? {
            RemoteReply::Instance(i) => Ok(i),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_all_images(
        &self,
        provider: &str,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Vec<ImageSummary>> {
        let call = RemoteCall::GetAllImages {
            cloud_name: cloud_name.to_string(),
            user: user.clone(),
        };
        match self.call(provider, call).await? {
            RemoteReply::Images(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_image(
        &self,
        provider: &str,
        cloud_name: &str,
        image_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<Image> {
        let call = RemoteCall::GetImage {
            cloud_name: cloud_name.to_string(),
            image_id: image_id.to_string(),
            user: user.clone(),
        };
        match self.call(provider, call).await? {
            RemoteReply::Image(i) => Ok(i),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_cloud_names(
        &self,
        provider: &str,
        user: &FederationUser,
    ) -> BrokerResult<Vec<String>> {
        let call = RemoteCall::GetCloudNames { user: user.clone() };
        match self.call(provider, call).await? {
            RemoteReply::CloudNames(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_user_quota(
        &self,
        provider: &str,
        cloud_name: &str,
        user: &FederationUser,
    ) -> BrokerResult<Quota> {
        let call = RemoteCall::GetUserQuota {
            cloud_name: cloud_name.to_string(),
            user: user.clone(),
        };
        match self.call(provider, call).await? {
            RemoteReply::Quota(q) => Ok(q),
            other => Err(unexpected(other)),
        }
    }

    /// Tell the requesting broker that `order` settled in `new_state`.
    pub async fn notify_event(&self, order: &Order, new_state: OrderState) -> BrokerResult<()> {
        self.expect_empty(
            order.requester(),
            RemoteCall::NotifyEvent {
                order_id: order.id(),
                new_state,
            },
        )
        .await
    }

    pub async fn create_security_rule(
        &self,
        order: &Order,
        rule: &SecurityRule,
        user: &FederationUser,
    ) -> BrokerResult<String> {
        let call = RemoteCall::CreateSecurityRule {
            order_id: order.id(),
            rule: rule.clone(),
            user: user.clone(),
        };
        match self.call(order.provider(), call).await? {
            RemoteReply::RuleId(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete_security_rule(
        &self,
        provider: &str,
        cloud_name: &str,
        rule_id: &str,
        user: &FederationUser,
    ) -> BrokerResult<()> {
        self.expect_empty(
            provider,
            RemoteCall::DeleteSecurityRule {
                cloud_name: cloud_name.to_string(),
                rule_id: rule_id.to_string(),
                user: user.clone(),
            },
        )
        .await
    }

    pub async fn get_all_security_rules(
        &self,
        order: &Order,
        user: &FederationUser,
    ) -> BrokerResult<Vec<SecurityRuleInstance>> {
        let call = RemoteCall::GetAllSecurityRules {
            order_id: order.id(),
            user: user.clone(),
        };
        match self.call(order.provider(), call).await? {
            RemoteReply::SecurityRules(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub async fn lifecycle(
        &self,
        order: &Order,
        user: &FederationUser,
        op: LifecycleOp,
    ) -> BrokerResult<()> {
        self.expect_empty(
            order.provider(),
            RemoteCall::Lifecycle {
                order_id: order.id(),
                user: user.clone(),
                op,
            },
        )
        .await
    }
}

fn unexpected(reply: RemoteReply) -> BrokerError {
    BrokerError::Communication(format!("unexpected reply shape: {reply:?}"))
}
