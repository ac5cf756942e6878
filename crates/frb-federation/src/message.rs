//! Wire envelope of the federation link.
//!
//! Every packet is JSON. A request names a method from the fixed catalog,
//! the originating and target provider, and a bag of named fields; a
//! response echoes the request id and carries either result fields or an
//! error condition.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ErrorCondition;

// ---------------------------------------------------------------------------
// Method catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteMethod {
    CreateOrder,
    DeleteOrder,
    GetOrder,
    GetInstance,
    GetAllImages,
    GetImage,
    GetCloudNames,
    GetUserQuota,
    NotifyEvent,
    CreateSecurityRule,
    DeleteSecurityRule,
    GetAllSecurityRules,
    PauseCompute,
    HibernateCompute,
    StopCompute,
    ResumeCompute,
    TakeSnapshot,
}

impl RemoteMethod {
    pub const ALL: [RemoteMethod; 17] = [
        RemoteMethod::CreateOrder,
        RemoteMethod::DeleteOrder,
        RemoteMethod::GetOrder,
        RemoteMethod::GetInstance,
        RemoteMethod::GetAllImages,
        RemoteMethod::GetImage,
        RemoteMethod::GetCloudNames,
        RemoteMethod::GetUserQuota,
        RemoteMethod::NotifyEvent,
        RemoteMethod::CreateSecurityRule,
        RemoteMethod::DeleteSecurityRule,
        RemoteMethod::GetAllSecurityRules,
        RemoteMethod::PauseCompute,
        RemoteMethod::HibernateCompute,
        RemoteMethod::StopCompute,
        RemoteMethod::ResumeCompute,
        RemoteMethod::TakeSnapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteMethod::CreateOrder => "create-order",
            RemoteMethod::DeleteOrder => "delete-order",
            RemoteMethod::GetOrder => "get-order",
            RemoteMethod::GetInstance => "get-instance",
            RemoteMethod::GetAllImages => "get-all-images",
            RemoteMethod::GetImage => "get-image",
            RemoteMethod::GetCloudNames => "get-cloud-names",
            RemoteMethod::GetUserQuota => "get-user-quota",
            RemoteMethod::NotifyEvent => "notify-event",
            RemoteMethod::CreateSecurityRule => "create-security-rule",
            RemoteMethod::DeleteSecurityRule => "delete-security-rule",
            RemoteMethod::GetAllSecurityRules => "get-all-security-rules",
            RemoteMethod::PauseCompute => "pause-compute",
            RemoteMethod::HibernateCompute => "hibernate-compute",
            RemoteMethod::StopCompute => "stop-compute",
            RemoteMethod::ResumeCompute => "resume-compute",
            RemoteMethod::TakeSnapshot => "take-snapshot",
        }
    }
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

/// Named slots a packet may carry. Payload fields travel next to a
/// `*-class-tag` field naming the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldName {
    OrderClassTag,
    Order,
    OrderId,
    InstanceClassTag,
    Instance,
    ProviderId,
    CloudName,
    NewState,
    ImageId,
    ImageClassTag,
    Image,
    RuleId,
    SecurityRule,
    User,
    ResourceType,
    Quota,
    SnapshotName,
    CloudNameList,
    CloudNameListElementClassTag,
    ImageList,
    ImageListElementClassTag,
    SecurityRuleList,
    SecurityRuleListElementClassTag,
}

impl FieldName {
    pub fn as_str(&self) -> String {
        // serde is the single source of the kebab-case spelling.
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("missing field '{0}'")]
    MissingField(FieldName),
    #[error("field '{field}' does not decode: {source}")]
    Field {
        field: FieldName,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload tagged '{tag}' carries a {found} body")]
    TagMismatch { tag: String, found: String },
    #[error("tag '{tag}' is not valid in field '{field}'")]
    UnexpectedTag { field: FieldName, tag: String },
    #[error("reply to {method} has the wrong shape")]
    UnexpectedReply { method: RemoteMethod },
}

/// The named-field bag of a request or a successful response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketFields(BTreeMap<FieldName, Value>);

impl PacketFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, name: FieldName, value: &T) -> Result<(), CodecError> {
        let v = serde_json::to_value(value).map_err(|source| CodecError::Field {
            field: name,
            source,
        })?;
        self.0.insert(name, v);
        Ok(())
    }

    pub fn put_raw(&mut self, name: FieldName, value: Value) {
        self.0.insert(name, value);
    }

    pub fn raw(&self, name: FieldName) -> Option<&Value> {
        self.0.get(&name)
    }

    pub fn require<T: DeserializeOwned>(&self, name: FieldName) -> Result<T, CodecError> {
        let v = self.0.get(&name).ok_or(CodecError::MissingField(name))?;
        serde_json::from_value(v.clone()).map_err(|source| CodecError::Field {
            field: name,
            source,
        })
    }

    pub fn optional<T: DeserializeOwned>(&self, name: FieldName) -> Result<Option<T>, CodecError> {
        match self.0.get(&name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.require(name).map(Some),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub id: RequestId,
    pub method: RemoteMethod,
    /// Originating provider.
    pub from: String,
    pub to: String,
    pub fields: PacketFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    Ok {
        fields: PacketFields,
    },
    Err {
        condition: ErrorCondition,
        message: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Id of the request being answered.
    pub id: RequestId,
    pub from: String,
    pub to: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Packet {
    Request(RemoteRequest),
    Response(RemoteResponse),
}

impl Packet {
    pub fn to(&self) -> &str {
        match self {
            Packet::Request(r) => &r.to,
            Packet::Response(r) => &r.to,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            Packet::Request(r) => &r.from,
            Packet::Response(r) => &r.from,
        }
    }
}
