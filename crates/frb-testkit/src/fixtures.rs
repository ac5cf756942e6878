//! Brokers assembled in-process: standalone, or several joined by a
//! loopback federation network.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use frb_cloud_sim::{SimCloud, SimSettings};
use frb_db::{MemoryStorage, StableStorage};
use frb_execution::LocalCloudConnector;
use frb_federation::LoopbackNetwork;
use frb_runtime::{BrokerRuntime, FederationLink, RuntimeParts, WorkerIntervals};
use frb_schemas::{
    ComputeSpec, FederationUser, Order, OrderId, OrderState, ResourceSpec, VolumeSpec,
};

pub const SIM_CLOUD: &str = "sim";
pub const FAST_WORKERS: Duration = Duration::from_millis(10);

pub fn alice() -> FederationUser {
    FederationUser::new("alice", "idp-1", "Alice")
}

pub fn volume_spec(size_gb: u64) -> ResourceSpec {
    ResourceSpec::Volume(VolumeSpec {
        name: "data".into(),
        size_gb,
    })
}

pub fn compute_spec(vcpu: u32) -> ResourceSpec {
    ResourceSpec::Compute(ComputeSpec {
        name: "vm".into(),
        vcpu,
        memory_mb: 1024,
        disk_gb: 20,
        image_id: "img-ubuntu".into(),
        public_key: None,
        network_order_ids: vec![],
    })
}

/// One broker with a single simulated cloud named [`SIM_CLOUD`].
pub struct TestBroker {
    pub runtime: Arc<BrokerRuntime>,
    pub cloud: SimCloud,
}

impl TestBroker {
    pub async fn standalone(id: &str, settings: SimSettings) -> Result<Self> {
        Self::assemble(id, Arc::new(MemoryStorage::new()), settings, None).await
    }

    pub async fn assemble(
        id: &str,
        storage: Arc<dyn StableStorage>,
        settings: SimSettings,
        federation: Option<FederationLink>,
    ) -> Result<Self> {
        let cloud = SimCloud::new(SIM_CLOUD, settings);
        let runtime = BrokerRuntime::assemble(RuntimeParts {
            local_id: id.to_string(),
            storage,
            clouds: LocalCloudConnector::new().with_cloud(SIM_CLOUD, cloud.plugins()),
            default_cloud: SIM_CLOUD.to_string(),
            federation,
            intervals: WorkerIntervals::uniform(FAST_WORKERS),
        })
        .await?;
        Ok(Self {
            runtime: Arc::new(runtime),
            cloud,
        })
    }

    /// Open an order from this broker on `provider`'s default cloud.
    pub async fn open(&self, provider: Option<&str>, spec: ResourceSpec) -> Result<OrderId> {
        let c = self.runtime.controller();
        let order = c.new_order(alice(), spec, provider, None);
        Ok(c.activate(order).await?)
    }

    /// Current state of `id`, from the registry or storage.
    pub async fn state_of(&self, id: OrderId) -> Result<Option<OrderState>> {
        let found = self.runtime.controller().lookup(id).await?;
        Ok(found.map(|o| o.state()))
    }

    /// Poll until `id` reaches `state` or `within` elapses.
    pub async fn wait_for(&self, id: OrderId, state: OrderState, within: Duration) -> Result<Order> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Some(o) = self.runtime.controller().lookup(id).await? {
                if o.state() == state {
                    return Ok(o);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let now = self.state_of(id).await?;
                bail!(
                    "{}: order {id} did not reach {state} within {within:?} (now {now:?})",
                    self.runtime.local_id()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Several brokers on one loopback network, each with its inbox served.
pub struct Federation {
    pub network: LoopbackNetwork,
    pub brokers: BTreeMap<String, TestBroker>,
}

impl Federation {
    pub async fn new(ids: &[&str], settings: SimSettings, rpc_timeout: Duration) -> Result<Self> {
        let network = LoopbackNetwork::new();
        let mut brokers = BTreeMap::new();
        for id in ids {
            let (transport, inbox) = network.join(id);
            let broker = TestBroker::assemble(
                id,
                Arc::new(MemoryStorage::new()),
                settings,
                Some(FederationLink {
                    transport: Arc::new(transport),
                    timeout: rpc_timeout,
                }),
            )
            .await?;
            broker.runtime.spawn_inbox(inbox)?;
            brokers.insert(id.to_string(), broker);
        }
        Ok(Self { network, brokers })
    }

    pub fn broker(&self, id: &str) -> Result<&TestBroker> {
        self.brokers
            .get(id)
            .with_context(|| format!("no broker named {id}"))
    }

    pub fn start_workers(&self) {
        for b in self.brokers.values() {
            b.runtime.start_workers();
        }
    }

    pub async fn shutdown(&self) {
        for b in self.brokers.values() {
            b.runtime.shutdown().await;
        }
    }
}
