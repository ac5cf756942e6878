//! Provider dispatcher: the single choke point between order handling and
//! clouds. Every provisioning, lifecycle and catalog operation picks its
//! connector here by comparing the providing member with the local id.

use std::sync::Arc;

use frb_federation::RemoteClient;
use frb_schemas::{BrokerError, BrokerResult, Order};

use crate::connector::{CloudConnector, LocalCloudConnector, RemoteCloudConnector};

pub struct ProviderDispatcher {
    local_id: String,
    local: Arc<LocalCloudConnector>,
    /// `None` in standalone mode.
    remote: Option<RemoteClient>,
}

impl ProviderDispatcher {
    pub fn new(
        local_id: impl Into<String>,
        local: Arc<LocalCloudConnector>,
        remote: Option<RemoteClient>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            local,
            remote,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_local(&self, provider: &str) -> bool {
        provider == self.local_id
    }

    pub fn local(&self) -> &LocalCloudConnector {
        &self.local
    }

    pub fn remote_client(&self) -> Option<&RemoteClient> {
        self.remote.as_ref()
    }

    /// Connector for clouds of `provider`.
    pub fn for_provider(&self, provider: &str) -> BrokerResult<Arc<dyn CloudConnector>> {
        if self.is_local(provider) {
            return Ok(self.local.clone());
        }
        match &self.remote {
            Some(client) => Ok(Arc::new(RemoteCloudConnector::new(provider, client.clone()))),
            None => Err(BrokerError::UnavailableProvider(format!(
                "no federation link configured; cannot reach provider {provider}"
            ))),
        }
    }

    pub fn for_order(&self, order: &Order) -> BrokerResult<Arc<dyn CloudConnector>> {
        self.for_provider(order.provider())
    }
}
