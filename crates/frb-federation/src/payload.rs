//! Class-tagged payloads.
//!
//! Orders and instances are polymorphic over the resource type, and the
//! list results carry elements of one concrete kind. Each such field travels
//! next to a tag field naming the concrete variant; decoding goes through
//! the explicit table in [`Payload::decode`], never through reflection.

use std::fmt;

use frb_schemas::{
    Image, ImageSummary, Instance, Order, Quota, ResourceType, SecurityRule, SecurityRuleInstance,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{CodecError, FieldName, PacketFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadTag {
    ComputeOrder,
    NetworkOrder,
    VolumeOrder,
    AttachmentOrder,
    PublicIpOrder,
    ComputeInstance,
    NetworkInstance,
    VolumeInstance,
    AttachmentInstance,
    PublicIpInstance,
    SecurityRuleInstance,
    ImageSummary,
    Image,
    SecurityRule,
    Quota,
    CloudName,
}

impl PayloadTag {
    pub fn for_order(rt: ResourceType) -> Option<Self> {
        match rt {
            ResourceType::Compute => Some(PayloadTag::ComputeOrder),
            ResourceType::Network => Some(PayloadTag::NetworkOrder),
            ResourceType::Volume => Some(PayloadTag::VolumeOrder),
            ResourceType::Attachment => Some(PayloadTag::AttachmentOrder),
            ResourceType::PublicIp => Some(PayloadTag::PublicIpOrder),
            ResourceType::SecurityRule => None,
        }
    }

    /// Security rules are installed, not provisioned, so they have no
    /// instance tag of their own.
    pub fn for_instance(rt: ResourceType) -> Option<Self> {
        match rt {
            ResourceType::Compute => Some(PayloadTag::ComputeInstance),
            ResourceType::Network => Some(PayloadTag::NetworkInstance),
            ResourceType::Volume => Some(PayloadTag::VolumeInstance),
            ResourceType::Attachment => Some(PayloadTag::AttachmentInstance),
            ResourceType::PublicIp => Some(PayloadTag::PublicIpInstance),
            ResourceType::SecurityRule => None,
        }
    }

    /// Resource type an order or instance tag stands for.
    fn resource_type(&self) -> Option<ResourceType> {
        match self {
            PayloadTag::ComputeOrder | PayloadTag::ComputeInstance => Some(ResourceType::Compute),
            PayloadTag::NetworkOrder | PayloadTag::NetworkInstance => Some(ResourceType::Network),
            PayloadTag::VolumeOrder | PayloadTag::VolumeInstance => Some(ResourceType::Volume),
            PayloadTag::AttachmentOrder | PayloadTag::AttachmentInstance => {
                Some(ResourceType::Attachment)
            }
            PayloadTag::PublicIpOrder | PayloadTag::PublicIpInstance => {
                Some(ResourceType::PublicIp)
            }
            _ => None,
        }
    }

    fn as_string(&self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

impl fmt::Display for PayloadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// One decoded tagged value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Order(Order),
    Instance(Instance),
    ImageSummary(ImageSummary),
    Image(Image),
    SecurityRule(SecurityRule),
    SecurityRuleInstance(SecurityRuleInstance),
    Quota(Quota),
    CloudName(String),
}

impl Payload {
    pub fn tag(&self) -> Result<PayloadTag, CodecError> {
        Ok(match self {
            Payload::Order(o) => {
                PayloadTag::for_order(o.resource_type()).ok_or_else(|| CodecError::TagMismatch {
                    tag: "order".to_string(),
                    found: o.resource_type().to_string(),
                })?
            }
            Payload::Instance(i) => {
                PayloadTag::for_instance(i.resource_type).ok_or_else(|| {
                    CodecError::TagMismatch {
                        tag: "instance".to_string(),
                        found: i.resource_type.to_string(),
                    }
                })?
            }
            Payload::ImageSummary(_) => PayloadTag::ImageSummary,
            Payload::Image(_) => PayloadTag::Image,
            Payload::SecurityRule(_) => PayloadTag::SecurityRule,
            Payload::SecurityRuleInstance(_) => PayloadTag::SecurityRuleInstance,
            Payload::Quota(_) => PayloadTag::Quota,
            Payload::CloudName(_) => PayloadTag::CloudName,
        })
    }

    fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            Payload::Order(o) => serde_json::to_value(o),
            Payload::Instance(i) => serde_json::to_value(i),
            Payload::ImageSummary(s) => serde_json::to_value(s),
            Payload::Image(i) => serde_json::to_value(i),
            Payload::SecurityRule(r) => serde_json::to_value(r),
            Payload::SecurityRuleInstance(r) => serde_json::to_value(r),
            Payload::Quota(q) => serde_json::to_value(q),
            Payload::CloudName(n) => serde_json::to_value(n),
        }
    }

    /// Tag -> decoder table. `field` only labels errors.
    pub fn decode(field: FieldName, tag: PayloadTag, body: Value) -> Result<Payload, CodecError> {
        let bad = |source| CodecError::Field { field, source };
        let payload = match tag {
            PayloadTag::ComputeOrder
            | PayloadTag::NetworkOrder
            | PayloadTag::VolumeOrder
            | PayloadTag::AttachmentOrder
            | PayloadTag::PublicIpOrder => {
                Payload::Order(serde_json::from_value(body).map_err(bad)?)
            }
            PayloadTag::ComputeInstance
            | PayloadTag::NetworkInstance
            | PayloadTag::VolumeInstance
            | PayloadTag::AttachmentInstance
            | PayloadTag::PublicIpInstance => {
                Payload::Instance(serde_json::from_value(body).map_err(bad)?)
            }
            PayloadTag::SecurityRuleInstance => {
                Payload::SecurityRuleInstance(serde_json::from_value(body).map_err(bad)?)
            }
            PayloadTag::ImageSummary => {
                Payload::ImageSummary(serde_json::from_value(body).map_err(bad)?)
            }
            PayloadTag::Image => Payload::Image(serde_json::from_value(body).map_err(bad)?),
            PayloadTag::SecurityRule => {
                Payload::SecurityRule(serde_json::from_value(body).map_err(bad)?)
            }
            PayloadTag::Quota => Payload::Quota(serde_json::from_value(body).map_err(bad)?),
            PayloadTag::CloudName => {
                Payload::CloudName(serde_json::from_value(body).map_err(bad)?)
            }
        };

        // The body must agree with the resource type its tag promises.
        let found = match &payload {
            Payload::Order(o) => Some(o.resource_type()),
            Payload::Instance(i) => Some(i.resource_type),
            _ => None,
        };
        if let Some(found) = found {
            if tag.resource_type() != Some(found) {
                return Err(CodecError::TagMismatch {
                    tag: tag.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

impl PacketFields {
    /// Store `payload` in `body` with its tag in `tag_field`.
    pub fn put_tagged(
        &mut self,
        tag_field: FieldName,
        body: FieldName,
        payload: &Payload,
    ) -> Result<(), CodecError> {
        let tag = payload.tag()?;
        let v = payload
            .body()
            .map_err(|source| CodecError::Field { field: body, source })?;
        self.put(tag_field, &tag)?;
        self.put_raw(body, v);
        Ok(())
    }

    pub fn take_tagged(&self, tag_field: FieldName, body: FieldName) -> Result<Payload, CodecError> {
        let tag: PayloadTag = self.require(tag_field)?;
        let v = self.raw(body).cloned().ok_or(CodecError::MissingField(body))?;
        Payload::decode(body, tag, v)
    }

    /// Store a homogeneous list. An empty list is tagged with `empty_tag`.
    pub fn put_tagged_list(
        &mut self,
        list: FieldName,
        element_tag_field: FieldName,
        empty_tag: PayloadTag,
        items: &[Payload],
    ) -> Result<(), CodecError> {
        let tag = match items.first() {
            Some(p) => p.tag()?,
            None => empty_tag,
        };
        let mut values = Vec::with_capacity(items.len());
        for p in items {
            let t = p.tag()?;
            if t != tag {
                return Err(CodecError::TagMismatch {
                    tag: tag.to_string(),
                    found: t.to_string(),
                });
            }
            values.push(
                p.body()
                    .map_err(|source| CodecError::Field { field: list, source })?,
            );
        }
        self.put(element_tag_field, &tag)?;
        self.put_raw(list, Value::Array(values));
        Ok(())
    }

    pub fn take_tagged_list(
        &self,
        list: FieldName,
        element_tag_field: FieldName,
    ) -> Result<Vec<Payload>, CodecError> {
        let tag: PayloadTag = self.require(element_tag_field)?;
        let values: Vec<Value> = self.require(list)?;
        values
            .into_iter()
            .map(|v| Payload::decode(list, tag, v))
            .collect()
    }
}
