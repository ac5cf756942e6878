//! Assembles one broker: storage → registry → dispatcher → workers, plus the
//! federation endpoint when peers are configured.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use frb_cloud_sim::{SimCloud, SimSettings};
use frb_config::{BrokerConfig, ConfigMode, FederationSecrets};
use frb_db::{SqliteStorage, StableStorage};
use frb_execution::{LocalCloudConnector, ProviderDispatcher};
use frb_federation::{
    FederationEndpoint, HttpTransport, Packet, PacketTransport, PendingCalls, RemoteClient,
};
use frb_orders::OrderRegistry;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::OrderController;
use crate::facade::RemoteFacade;
use crate::processor::OrderProcessor;
use crate::workers::{spawn_workers, WorkerIntervals};

/// Cloud driver name accepted in `clouds.entries.*.driver`.
pub const DRIVER_SIMULATED: &str = "simulated";

pub struct FederationLink {
    pub transport: Arc<dyn PacketTransport>,
    pub timeout: Duration,
}

pub struct RuntimeParts {
    pub local_id: String,
    pub storage: Arc<dyn StableStorage>,
    pub clouds: LocalCloudConnector,
    pub default_cloud: String,
    /// `None` runs the broker standalone.
    pub federation: Option<FederationLink>,
    pub intervals: WorkerIntervals,
}

pub struct BrokerRuntime {
    local_id: String,
    registry: Arc<OrderRegistry>,
    controller: Arc<OrderController>,
    processor: Arc<OrderProcessor>,
    endpoint: Option<FederationEndpoint>,
    intervals: WorkerIntervals,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerRuntime {
    /// Recover the registry from `parts.storage` and wire everything up.
    /// Nothing runs until [`start_workers`](Self::start_workers).
    pub async fn assemble(parts: RuntimeParts) -> Result<Self> {
        let registry = Arc::new(
            OrderRegistry::recover(parts.storage)
                .await
                .context("order registry recovery failed")?,
        );

        let pending = Arc::new(PendingCalls::new());
        let client = parts.federation.as_ref().map(|f| {
            RemoteClient::new(
                parts.local_id.clone(),
                f.transport.clone(),
                pending.clone(),
                f.timeout,
            )
        });

        let dispatcher = Arc::new(ProviderDispatcher::new(
            parts.local_id.clone(),
            Arc::new(parts.clouds),
            client,
        ));
        let controller = Arc::new(OrderController::new(
            registry.clone(),
            dispatcher.clone(),
            parts.default_cloud,
        ));
        let processor = Arc::new(OrderProcessor::new(registry.clone(), dispatcher));

        let endpoint = parts.federation.map(|f| {
            FederationEndpoint::new(
                parts.local_id.clone(),
                pending,
                f.transport,
                Arc::new(RemoteFacade::new(controller.clone())),
            )
        });

        let (shutdown_tx, _rx) = watch::channel(false);
        info!(
            provider = %parts.local_id,
            active_orders = registry.len(),
            federated = endpoint.is_some(),
            "broker runtime assembled"
        );

        Ok(Self {
            local_id: parts.local_id,
            registry,
            controller,
            processor,
            endpoint,
            intervals: parts.intervals,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build a runtime from validated config: SQLite storage, simulated
    /// clouds, and an HTTP federation link when peers are configured.
    pub async fn start(cfg: &BrokerConfig, secrets: FederationSecrets) -> Result<Self> {
        let storage = SqliteStorage::connect(&cfg.storage.url)
            .await
            .with_context(|| format!("open storage at {}", cfg.storage.url))?;

        let mut clouds = LocalCloudConnector::new();
        for (name, entry) in &cfg.clouds.entries {
            if entry.driver != DRIVER_SIMULATED {
                bail!(
                    "CONFIG_INVALID: cloud '{name}' uses unsupported driver '{}'",
                    entry.driver
                );
            }
            let sim = SimCloud::new(
                name.clone(),
                SimSettings {
                    ready_after_polls: entry.ready_after_polls,
                    max_instances: entry.max_instances as usize,
                },
            );
            clouds = clouds.with_cloud(name.clone(), sim.plugins());
        }

        let federation = match cfg.mode() {
            ConfigMode::Standalone => None,
            ConfigMode::Federated => {
                let http = HttpTransport::new(
                    cfg.federation.peers.clone(),
                    secrets.token,
                    cfg.federation.rpc_timeout(),
                )
                .context("build federation http client")?;
                Some(FederationLink {
                    transport: Arc::new(http),
                    timeout: cfg.federation.rpc_timeout(),
                })
            }
        };

        Self::assemble(RuntimeParts {
            local_id: cfg.provider.id.clone(),
            storage: Arc::new(storage),
            clouds,
            default_cloud: cfg.clouds.default.clone(),
            federation,
            intervals: WorkerIntervals::from_config(&cfg.workers),
        })
        .await
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub fn controller(&self) -> &Arc<OrderController> {
        &self.controller
    }

    pub fn processor(&self) -> &Arc<OrderProcessor> {
        &self.processor
    }

    /// Inbound federation entry point; `None` when standalone.
    pub fn endpoint(&self) -> Option<&FederationEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn start_workers(&self) {
        let handles = spawn_workers(
            self.processor.clone(),
            self.intervals,
            self.shutdown_tx.subscribe(),
        );
        self.tasks.lock().extend(handles);
    }

    /// Feed packets from an in-process inbox (loopback transport) into the
    /// federation endpoint.
    pub fn spawn_inbox(&self, inbox: mpsc::UnboundedReceiver<Packet>) -> Result<()> {
        let Some(endpoint) = self.endpoint.clone() else {
            bail!("broker {} has no federation link", self.local_id);
        };
        let handle = endpoint.spawn_receive_loop(inbox, self.shutdown_tx.subscribe());
        self.tasks.lock().push(handle);
        Ok(())
    }

    /// Signal every task and wait for them to finish their current pass.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for h in handles {
            if let Err(e) = h.await {
                warn!(provider = %self.local_id, error = %e, "task ended abnormally");
            }
        }
        info!(provider = %self.local_id, "broker runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frb_config::load_layered_yaml_from_strings;
    use frb_schemas::{FederationUser, OrderState, ResourceSpec, VolumeSpec};

    const BASE: &str = r#"
provider:
  id: broker-a
storage:
  url: "sqlite::memory:"
clouds:
  default: sim
  entries:
    sim:
      driver: simulated
      ready_after_polls: 1
      max_instances: 4
workers:
  open_sleep_ms: 5
  spawning_sleep_ms: 5
  fulfilled_sleep_ms: 5
  failed_sleep_ms: 5
"#;

    #[tokio::test]
    async fn standalone_runtime_from_config_fulfills_orders() {
        let cfg = load_layered_yaml_from_strings(&[BASE]).unwrap().broker().unwrap();
        let rt = BrokerRuntime::start(&cfg, FederationSecrets::default())
            .await
            .unwrap();
        assert!(rt.endpoint().is_none());
        assert!(rt.spawn_inbox(mpsc::unbounded_channel().1).is_err());

        let c = rt.controller();
        let order = c.new_order(
            FederationUser::new("u", "idp", "n"),
            ResourceSpec::Volume(VolumeSpec {
                name: "v".into(),
                size_gb: 1,
            }),
            None,
            None,
        );
        let id = c.activate(order).await.unwrap();
        rt.start_workers();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while rt.registry().get(id).map(|o| o.state()) != Some(OrderState::Fulfilled) {
            assert!(tokio::time::Instant::now() < deadline, "order never fulfilled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_driver_is_a_config_error() {
        let over = "clouds:\n  entries:\n    sim:\n      driver: openstack\n";
        let cfg = load_layered_yaml_from_strings(&[BASE, over])
            .unwrap()
            .broker()
            .unwrap();
        let err = BrokerRuntime::start(&cfg, FederationSecrets::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("unsupported driver"));
    }
}
