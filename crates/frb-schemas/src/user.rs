use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An already-authenticated federated identity.
///
/// Authentication happens upstream; the core only carries this value around
/// and hands it to plugins, which treat it as the cloud credentials handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationUser {
    pub user_id: String,
    pub identity_provider_id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl FederationUser {
    pub fn new(
        user_id: impl Into<String>,
        identity_provider_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            identity_provider_id: identity_provider_id.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Two identities refer to the same owner when both the user id and the
    /// issuing identity provider match. Attributes are ignored.
    pub fn same_owner(&self, other: &FederationUser) -> bool {
        self.user_id == other.user_id && self.identity_provider_id == other.identity_provider_id
    }
}
