//! Typed views of requests and successful replies.
//!
//! [`RemoteCall`] has one variant per catalog method; [`RemoteReply`] one per
//! result shape. Both encode to and decode from a method plus named fields.

use frb_schemas::{
    FederationUser, Image, ImageSummary, Instance, LifecycleOp, Order, OrderId, OrderState, Quota,
    ResourceType, SecurityRule, SecurityRuleInstance,
};

use crate::message::{CodecError, FieldName, PacketFields, RemoteMethod};
use crate::payload::{Payload, PayloadTag};

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateOrder {
        order: Order,
    },
    DeleteOrder {
        order_id: OrderId,
        resource_type: ResourceType,
        user: FederationUser,
    },
    GetOrder {
        order_id: OrderId,
        resource_type: ResourceType,
        user: FederationUser,
    },
    GetInstance {
        order_id: OrderId,
        resource_type: ResourceType,
        user: FederationUser,
    },
    GetAllImages {
        cloud_name: String,
        user: FederationUser,
    },
    GetImage {
        cloud_name: String,
        image_id: String,
        user: FederationUser,
    },
    GetCloudNames {
        user: FederationUser,
    },
    GetUserQuota {
        cloud_name: String,
        user: FederationUser,
    },
    /// Sent by the providing broker when one of its orders settles.
    NotifyEvent {
        order_id: OrderId,
        new_state: OrderState,
    },
    CreateSecurityRule {
        order_id: OrderId,
        rule: SecurityRule,
        user: FederationUser,
    },
    DeleteSecurityRule {
        cloud_name: String,
        rule_id: String,
        user: FederationUser,
    },
    GetAllSecurityRules {
        order_id: OrderId,
        user: FederationUser,
    },
    Lifecycle {
        order_id: OrderId,
        user: FederationUser,
        op: LifecycleOp,
    },
}

fn order_payload(f: &PacketFields) -> Result<Order, CodecError> {
    match f.take_tagged(FieldName::OrderClassTag, FieldName::Order)? {
        Payload::Order(o) => Ok(o),
        other => Err(CodecError::UnexpectedTag {
            field: FieldName::Order,
            tag: tag_name(&other),
        }),
    }
}

fn tag_name(p: &Payload) -> String {
    p.tag().map(|t| t.to_string()).unwrap_or_default()
}

impl RemoteCall {
    pub fn method(&self) -> RemoteMethod {
        match self {
            RemoteCall::CreateOrder { .. } => RemoteMethod::CreateOrder,
            RemoteCall::DeleteOrder { .. } => RemoteMethod::DeleteOrder,
            RemoteCall::GetOrder { .. } => RemoteMethod::GetOrder,
            RemoteCall::GetInstance { .. } => RemoteMethod::GetInstance,
            RemoteCall::GetAllImages { .. } => RemoteMethod::GetAllImages,
            RemoteCall::GetImage { .. } => RemoteMethod::GetImage,
            RemoteCall::GetCloudNames { .. } => RemoteMethod::GetCloudNames,
            RemoteCall::GetUserQuota { .. } => RemoteMethod::GetUserQuota,
            RemoteCall::NotifyEvent { .. } => RemoteMethod::NotifyEvent,
            RemoteCall::CreateSecurityRule { .. } => RemoteMethod::CreateSecurityRule,
            RemoteCall::DeleteSecurityRule { .. } => RemoteMethod::DeleteSecurityRule,
            RemoteCall::GetAllSecurityRules { .. } => RemoteMethod::GetAllSecurityRules,
            RemoteCall::Lifecycle { op, .. } => match op {
                LifecycleOp::Pause => RemoteMethod::PauseCompute,
                LifecycleOp::Hibernate => RemoteMethod::HibernateCompute,
                LifecycleOp::Stop => RemoteMethod::StopCompute,
                LifecycleOp::Resume => RemoteMethod::ResumeCompute,
                LifecycleOp::TakeSnapshot { .. } => RemoteMethod::TakeSnapshot,
            },
        }
    }

    pub fn encode(&self) -> Result<(RemoteMethod, PacketFields), CodecError> {
        let mut f = PacketFields::new();
        match self {
            RemoteCall::CreateOrder { order } => {
                f.put_tagged(
                    FieldName::OrderClassTag,
                    FieldName::Order,
                    &Payload::Order(order.clone()),
                )?;
            }
            RemoteCall::DeleteOrder {
                order_id,
                resource_type,
                user,
            }
            | RemoteCall::GetOrder {
                order_id,
                resource_type,
                user,
            }
            | RemoteCall::GetInstance {
                order_id,
                resource_type,
                user,
            } => {
                f.put(FieldName::OrderId, order_id)?;
                f.put(FieldName::ResourceType, resource_type)?;
                f.put(FieldName::User, user)?;
            }
            RemoteCall::GetAllImages { cloud_name, user }
            | RemoteCall::GetUserQuota { cloud_name, user } => {
                f.put(FieldName::CloudName, cloud_name)?;
                f.put(FieldName::User, user)?;
            }
            RemoteCall::GetImage {
                cloud_name,
                image_id,
                user,
            } => {
                f.put(FieldName::CloudName, cloud_name)?;
                f.put(FieldName::ImageId, image_id)?;
                f.put(FieldName::User, user)?;
            }
            RemoteCall::GetCloudNames { user } => f.put(FieldName::User, user)?,
            RemoteCall::NotifyEvent {
                order_id,
                new_state,
            } => {
                f.put(FieldName::OrderId, order_id)?;
                f.put(FieldName::NewState, new_state)?;
            }
            RemoteCall::CreateSecurityRule {
                order_id,
                rule,
                user,
            } => {
                f.put(FieldName::OrderId, order_id)?;
                f.put(FieldName::SecurityRule, rule)?;
                f.put(FieldName::User, user)?;
            }
            RemoteCall::DeleteSecurityRule {
                cloud_name,
                rule_id,
                user,
            } => {
                f.put(FieldName::CloudName, cloud_name)?;
                f.put(FieldName::RuleId, rule_id)?;
                f.put(FieldName::User, user)?;
            }
            RemoteCall::GetAllSecurityRules { order_id, user } => {
                f.put(FieldName::OrderId, order_id)?;
                f.put(FieldName::User, user)?;
            }
            RemoteCall::Lifecycle { order_id, user, op } => {
                f.put(FieldName::OrderId, order_id)?;
                f.put(FieldName::User, user)?;
                if let LifecycleOp::TakeSnapshot { name } = op {
                    f.put(FieldName::SnapshotName, name)?;
                }
            }
        }
        Ok((self.method(), f))
    }

    pub fn decode(method: RemoteMethod, f: &PacketFields) -> Result<Self, CodecError> {
        use RemoteMethod as M;

        let call = match method {
            M::CreateOrder => RemoteCall::CreateOrder {
                order: order_payload(f)?,
            },
            M::DeleteOrder => RemoteCall::DeleteOrder {
                order_id: f.require(FieldName::OrderId)?,
                resource_type: f.require(FieldName::ResourceType)?,
                user: f.require(FieldName::User)?,
            },
            M::GetOrder => RemoteCall::GetOrder {
                order_id: f.require(FieldName::OrderId)?,
                resource_type: f.require(FieldName::ResourceType)?,
                user: f.require(FieldName::User)?,
            },
            M::GetInstance => RemoteCall::GetInstance {
                order_id: f.require(FieldName::OrderId)?,
                resource_type: f.require(FieldName::ResourceType)?,
                user: f.require(FieldName::User)?,
            },
            M::GetAllImages => RemoteCall::GetAllImages {
                cloud_name: f.require(FieldName::CloudName)?,
                user: f.require(FieldName::User)?,
            },
            M::GetImage => RemoteCall::GetImage {
                cloud_name: f.require(FieldName::CloudName)?,
                image_id: f.require(FieldName::ImageId)?,
                user: f.require(FieldName::User)?,
            },
            M::GetCloudNames => RemoteCall::GetCloudNames {
                user: f.require(FieldName::User)?,
            },
            M::GetUserQuota => RemoteCall::GetUserQuota {
                cloud_name: f.require(FieldName::CloudName)?,
                user: f.require(FieldName::User)?,
            },
            M::NotifyEvent => RemoteCall::NotifyEvent {
                order_id: f.require(FieldName::OrderId)?,
                new_state: f.require(FieldName::NewState)?,
            },
            M::CreateSecurityRule => RemoteCall::CreateSecurityRule {
                order_id: f.require(FieldName::OrderId)?,
                rule: f.require(FieldName::SecurityRule)?,
                user: f.require(FieldName::User)?,
            },
            M::DeleteSecurityRule => RemoteCall::DeleteSecurityRule {
                cloud_name: f.require(FieldName::CloudName)?,
                rule_id: f.require(FieldName::RuleId)?,
                user: f.require(FieldName::User)?,
            },
            M::GetAllSecurityRules => RemoteCall::GetAllSecurityRules {
                order_id: f.require(FieldName::OrderId)?,
                user: f.require(FieldName::User)?,
            },
            M::PauseCompute | M::HibernateCompute | M::StopCompute | M::ResumeCompute
            | M::TakeSnapshot => {
                let op = match method {
                    M::PauseCompute => LifecycleOp::Pause,
                    M::HibernateCompute => LifecycleOp::Hibernate,
                    M::StopCompute => LifecycleOp::Stop,
                    M::ResumeCompute => LifecycleOp::Resume,
                    _ => LifecycleOp::TakeSnapshot {
                        name: f.require(FieldName::SnapshotName)?,
                    },
                };
                RemoteCall::Lifecycle {
                    order_id: f.require(FieldName::OrderId)?,
                    user: f.require(FieldName::User)?,
                    op,
                }
            }
        };
        Ok(call)
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    Empty,
    Order(Order),
    Instance(Instance),
    Images(Vec<ImageSummary>),
    Image(Image),
    CloudNames(Vec<String>),
    Quota(Quota),
    RuleId(String),
    SecurityRules(Vec<SecurityRuleInstance>),
}

impl RemoteReply {
    pub fn encode(&self) -> Result<PacketFields, CodecError> {
        let mut f = PacketFields::new();
        match self {
            RemoteReply::Empty => {}
            RemoteReply::Order(o) => f.put_tagged(
                FieldName::OrderClassTag,
                FieldName::Order,
                &Payload::Order(o.clone()),
            )?,
            RemoteReply::Instance(i) => f.put_tagged(
                FieldName::InstanceClassTag,
                FieldName::Instance,
                &Payload::Instance(i.clone()),
            )?,
            RemoteReply::Images(list) => {
                let items: Vec<Payload> = list.iter().cloned().map(Payload::ImageSummary).collect();
                f.put_tagged_list(
                    FieldName::ImageList,
                    FieldName::ImageListElementClassTag,
                    PayloadTag::ImageSummary,
                    &items,
                )?
            }
            RemoteReply::Image(i) => f.put_tagged(
                FieldName::ImageClassTag,
                FieldName::Image,
                &Payload::Image(i.clone()),
            )?,
            RemoteReply::CloudNames(names) => {
                let items: Vec<Payload> = names.iter().cloned().map(Payload::CloudName).collect();
                f.put_tagged_list(
                    FieldName::CloudNameList,
                    FieldName::CloudNameListElementClassTag,
                    PayloadTag::CloudName,
                    &items,
                )?
            }
            RemoteReply::Quota(q) => f.put(FieldName::Quota, q)?,
            RemoteReply::RuleId(id) => f.put(FieldName::RuleId, id)?,
            RemoteReply::SecurityRules(rules) => {
                let items: Vec<Payload> = rules
                    .iter()
                    .cloned()
                    .map(Payload::SecurityRuleInstance)
                    .collect();
                f.put_tagged_list(
                    FieldName::SecurityRuleList,
                    FieldName::SecurityRuleListElementClassTag,
                    PayloadTag::SecurityRuleInstance,
                    &items,
                )?
            }
        }
        Ok(f)
    }

    /// Decode the success payload expected for `method`.
    pub fn decode(method: RemoteMethod, f: &PacketFields) -> Result<Self, CodecError> {
        use RemoteMethod as M;

        let wrong = || CodecError::UnexpectedReply { method };
        let reply = match method {
            M::CreateOrder
            | M::DeleteOrder
            | M::NotifyEvent
            | M::DeleteSecurityRule
            | M::PauseCompute
            | M::HibernateCompute
            | M::StopCompute
            | M::ResumeCompute
            | M::TakeSnapshot => RemoteReply::Empty,
            M::GetOrder => RemoteReply::Order(order_payload(f)?),
            M::GetInstance => {
                match f.take_tagged(FieldName::InstanceClassTag, FieldName::Instance)? {
                    Payload::Instance(i) => RemoteReply::Instance(i),
                    _ => return Err(wrong()),
                }
            }
            M::GetAllImages => {
                let items = f.take_tagged_list(
                    FieldName::ImageList,
                    FieldName::ImageListElementClassTag,
                )?;
                let mut out = Vec::with_capacity(items.len());
                for p in items {
                    match p {
                        Payload::ImageSummary(s) => out.push(s),
                        _ => return Err(wrong()),
                    }
                }
                RemoteReply::Images(out)
            }
            M::GetImage => match f.take_tagged(FieldName::ImageClassTag, FieldName::Image)? {
                Payload::Image(i) => RemoteReply::Image(i),
                _ => return Err(wrong()),
            },
            M::GetCloudNames => {
                let items = f.take_tagged_list(
                    FieldName::CloudNameList,
                    FieldName::CloudNameListElementClassTag,
                )?;
                let mut out = Vec::with_capacity(items.len());
                for p in items {
                    match p {
                        Payload::CloudName(n) => out.push(n),
                        _ => return Err(wrong()),
                    }
                }
                RemoteReply::CloudNames(out)
            }
            M::GetUserQuota => RemoteReply::Quota(f.require(FieldName::Quota)?),
            M::CreateSecurityRule => RemoteReply::RuleId(f.require(FieldName::RuleId)?),
            M::GetAllSecurityRules => {
                let items = f.take_tagged_list(
                    FieldName::SecurityRuleList,
                    FieldName::SecurityRuleListElementClassTag,
                )?;
                let mut out = Vec::with_capacity(items.len());
                for p in items {
                    match p {
                        Payload::SecurityRuleInstance(r) => out.push(r),
                        _ => return Err(wrong()),
                    }
                }
                RemoteReply::SecurityRules(out)
            }
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frb_schemas::{ComputeSpec, Direction, EtherType, Protocol, ResourceSpec};

    fn user() -> FederationUser {
        FederationUser::new("u1", "idp", "alice")
    }

    fn compute_order() -> Order {
        Order::new(
            "a",
            "b",
            "sim",
            user(),
            ResourceSpec::Compute(ComputeSpec {
                name: "vm".into(),
                vcpu: 2,
                memory_mb: 2048,
                disk_gb: 20,
                image_id: "img-1".into(),
                public_key: None,
                network_order_ids: vec![],
            }),
        )
    }

    #[test]
    fn every_request_shape_survives_its_fields() {
        let id = OrderId::new();
        let calls = vec![
            RemoteCall::CreateOrder {
                order: compute_order(),
            },
            RemoteCall::DeleteOrder {
                order_id: id,
                resource_type: ResourceType::Compute,
                user: user(),
            },
            RemoteCall::GetInstance {
                order_id: id,
                resource_type: ResourceType::Volume,
                user: user(),
            },
            RemoteCall::GetImage {
                cloud_name: "sim".into(),
                image_id: "img-1".into(),
                user: user(),
            },
            RemoteCall::NotifyEvent {
                order_id: id,
                new_state: OrderState::Fulfilled,
            },
            RemoteCall::CreateSecurityRule {
                order_id: id,
                rule: SecurityRule {
                    direction: Direction::In,
                    protocol: Protocol::Tcp,
                    ether_type: EtherType::IPv4,
                    port_from: 22,
                    port_to: 22,
                    cidr: "0.0.0.0/0".into(),
                },
                user: user(),
            },
            RemoteCall::Lifecycle {
                order_id: id,
                user: user(),
                op: LifecycleOp::TakeSnapshot {
                    name: "nightly".into(),
                },
            },
        ];
        for call in calls {
            let (method, fields) = call.encode().unwrap();
            assert_eq!(RemoteCall::decode(method, &fields).unwrap(), call);
        }
    }

    #[test]
    fn lifecycle_ops_pick_their_method() {
        let call = RemoteCall::Lifecycle {
            order_id: OrderId::new(),
            user: user(),
            op: LifecycleOp::Hibernate,
        };
        assert_eq!(call.method(), RemoteMethod::HibernateCompute);
        let (_, f) = call.encode().unwrap();
        assert!(f.raw(FieldName::SnapshotName).is_none());
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let f = PacketFields::new();
        let err = RemoteCall::decode(RemoteMethod::GetCloudNames, &f).unwrap_err();
        assert!(matches!(err, CodecError::MissingField(FieldName::User)));
    }

    #[test]
    fn list_reply_keeps_order_and_rejects_foreign_elements() {
        let reply = RemoteReply::CloudNames(vec!["east".into(), "west".into()]);
        let f = reply.encode().unwrap();
        assert_eq!(
            RemoteReply::decode(RemoteMethod::GetCloudNames, &f).unwrap(),
            reply
        );

        let images = RemoteReply::Images(vec![]).encode().unwrap();
        assert_eq!(
            RemoteReply::decode(RemoteMethod::GetAllImages, &images).unwrap(),
            RemoteReply::Images(vec![])
        );
        // An image list where cloud names are expected.
        assert!(RemoteReply::decode(RemoteMethod::GetCloudNames, &images).is_err());
    }

    #[test]
    fn order_reply_must_carry_an_order_tag() {
        let mut f = PacketFields::new();
        f.put(FieldName::OrderClassTag, &PayloadTag::Quota).unwrap();
        f.put_raw(
            FieldName::Order,
            serde_json::json!({"total": {}, "used": {}}),
        );
        assert!(RemoteReply::decode(RemoteMethod::GetOrder, &f).is_err());
    }
}
