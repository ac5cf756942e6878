//! Where orders meet clouds.
//!
//! Plugins implement the per-cloud contracts; connectors wrap either the
//! local plugins or a peer broker; the [`ProviderDispatcher`] picks one.

mod connector;
mod dispatcher;
mod plugin;

pub use connector::{CloudConnector, CloudPlugins, LocalCloudConnector, RemoteCloudConnector};
pub use dispatcher::ProviderDispatcher;
pub use plugin::{CloudServicesPlugin, NoCloudServices, ProvisioningPlugin};
