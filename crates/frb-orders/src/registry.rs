//! The order registry: one map from id to order, one bucket per active state.
//!
//! The map is the single owner of `Order` values; buckets hold ids only.
//! Workers check a copy out with [`OrderRegistry::next_in`], work on it, and
//! check it back in with [`OrderRegistry::commit`], which is a
//! compare-and-set on the stored state:
//!
//! 1. the stored state must still equal `from`, else `Stale`;
//! 2. `from -> order.state()` must be a lifecycle edge;
//! 3. the order is written to stable storage;
//! 4. only then is the map updated and the id moved between buckets.
//!
//! Commits are serialized by an async mutex so that step 3 and step 4 of one
//! commit never interleave with another commit. A failed write leaves the
//! order exactly where it was.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use frb_db::{StableStorage, StorageError};
use frb_schemas::{BrokerError, Order, OrderId, OrderState};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::bucket::{BucketError, OrderBucket};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("order {0} is already registered")]
    DuplicateOrder(OrderId),
    #[error("order {0} is not registered")]
    UnknownOrder(OrderId),
    #[error("stale commit for order {id}: expected {expected}, found {actual}")]
    Stale {
        id: OrderId,
        expected: OrderState,
        actual: OrderState,
    },
    #[error("illegal transition for order {id}: {from} -> {to}")]
    IllegalTransition {
        id: OrderId,
        from: OrderState,
        to: OrderState,
    },
    #[error(transparent)]
    Bucket(#[from] BucketError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<RegistryError> for BrokerError {
    fn from(e: RegistryError) -> Self {
        let msg = e.to_string();
        match e {
            RegistryError::DuplicateOrder(_) | RegistryError::Bucket(_) => {
                BrokerError::InvalidParameter(msg)
            }
            RegistryError::UnknownOrder(_) => BrokerError::InstanceNotFound(msg),
            RegistryError::Stale { .. } | RegistryError::IllegalTransition { .. } => {
                BrokerError::UnacceptableOperation(msg)
            }
            RegistryError::Storage(_) => BrokerError::InternalServer(msg),
        }
    }
}

/// Broadcast after every successful activation or commit that changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub order_id: OrderId,
    /// `None` for a freshly activated order.
    pub from: Option<OrderState>,
    pub to: OrderState,
    pub at: DateTime<Utc>,
}

pub struct OrderRegistry {
    orders: RwLock<HashMap<OrderId, Order>>,
    buckets: BTreeMap<OrderState, OrderBucket>,
    storage: Arc<dyn StableStorage>,
    commit_guard: Mutex<()>,
    transitions: broadcast::Sender<Transition>,
}

impl OrderRegistry {
    /// An empty registry over `storage`. Use [`recover`](Self::recover) at
    /// process start.
    pub fn new(storage: Arc<dyn StableStorage>) -> Self {
        let buckets = OrderState::ACTIVE
            .into_iter()
            .map(|s| (s, OrderBucket::new(s)))
            .collect();
        let (transitions, _rx) = broadcast::channel(1024);
        Self {
            orders: RwLock::new(HashMap::new()),
            buckets,
            storage,
            commit_guard: Mutex::new(()),
            transitions,
        }
    }

    /// Rebuild the registry from every active state in stable storage.
    pub async fn recover(storage: Arc<dyn StableStorage>) -> Result<Self, RegistryError> {
        let reg = Self::new(storage);
        for state in OrderState::ACTIVE {
            let loaded = reg.storage.load_active(state).await?;
            let n = loaded.len();
            for order in loaded {
                if order.state() != state {
                    warn!(order_id = %order.id(), %state, "storage returned order in wrong state; skipped");
                    continue;
                }
                if reg.orders.read().contains_key(&order.id()) {
                    warn!(order_id = %order.id(), "order recovered twice; skipped");
                    continue;
                }
                reg.bucket(state).insert(order.id())?;
                reg.orders.write().insert(order.id(), order);
            }
            if n > 0 {
                info!(%state, recovered = n, "recovered orders");
            }
        }
        Ok(reg)
    }

    fn bucket(&self, state: OrderState) -> &OrderBucket {
        // ACTIVE is exactly the key set built in `new`; terminal states never
        // reach here.
        &self.buckets[&state]
    }

    pub fn storage(&self) -> &Arc<dyn StableStorage> {
        &self.storage
    }

    /// Persist a new OPEN order and start tracking it.
    pub async fn activate(&self, order: Order) -> Result<(), RegistryError> {
        if order.state() != OrderState::Open {
            return Err(BucketError::InvalidArgument(format!(
                "order {} must be OPEN to activate, is {}",
                order.id(),
                order.state()
            ))
            .into());
        }
        if order.id().is_nil() {
            return Err(BucketError::InvalidArgument("nil order id".to_string()).into());
        }

        let _g = self.commit_guard.lock().await;
        let id = order.id();
        if self.orders.read().contains_key(&id) {
            return Err(RegistryError::DuplicateOrder(id));
        }

        self.storage.persist_new(&order).await.map_err(|e| match e {
            StorageError::Duplicate(id) => RegistryError::DuplicateOrder(id),
            other => RegistryError::Storage(other),
        })?;

        self.orders.write().insert(id, order);
        self.bucket(OrderState::Open).insert(id)?;
        debug!(order_id = %id, "order activated");

        let _ = self.transitions.send(Transition {
            order_id: id,
            from: None,
            to: OrderState::Open,
            at: Utc::now(),
        });
        Ok(())
    }

    /// A copy of the registered order.
    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.orders.read().get(&id).cloned()
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.orders.read().contains_key(&id)
    }

    /// Check out the next order in `state`'s bucket, advancing its cursor.
    /// Ids whose stored state already moved on are skipped.
    pub fn next_in(&self, state: OrderState) -> Option<Order> {
        if state.is_terminal() {
            return None;
        }
        let bucket = self.bucket(state);
        loop {
            let id = bucket.next()?;
            match self.orders.read().get(&id) {
                Some(o) if o.state() == state => return Some(o.clone()),
                _ => continue,
            }
        }
    }

    pub fn reset_cursor(&self, state: OrderState) {
        if !state.is_terminal() {
            self.bucket(state).reset();
        }
    }

    /// Check a modified copy back in. See the module docs for the protocol.
    pub async fn commit(&self, order: &Order, from: OrderState) -> Result<(), RegistryError> {
        let _g = self.commit_guard.lock().await;
        let id = order.id();
        let to = order.state();

        let actual = self
            .orders
            .read()
            .get(&id)
            .map(Order::state)
            .ok_or(RegistryError::UnknownOrder(id))?;
        if actual != from {
            return Err(RegistryError::Stale {
                id,
                expected: from,
                actual,
            });
        }

        let changed = to != from;
        if changed && !from.can_transition_to(to) {
            return Err(RegistryError::IllegalTransition { id, from, to });
        }

        // Write-ahead: durable first, in-memory second.
        self.storage.persist_update(order, changed).await?;

        {
            let mut map = self.orders.write();
            if to.is_terminal() {
                map.remove(&id);
            } else {
                map.insert(id, order.clone());
            }
        }

        if changed {
            self.bucket(from).remove(id);
            if !to.is_terminal() {
                self.bucket(to).insert(id)?;
            }
            debug!(order_id = %id, %from, %to, "order transitioned");
            let _ = self.transitions.send(Transition {
                order_id: id,
                from: Some(from),
                to,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Number of ids in each active bucket.
    pub fn counts(&self) -> BTreeMap<OrderState, usize> {
        self.buckets.iter().map(|(s, b)| (*s, b.len())).collect()
    }

    pub fn ids_in(&self, state: OrderState) -> Vec<OrderId> {
        if state.is_terminal() {
            return Vec::new();
        }
        self.bucket(state).snapshot()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cross-check map and buckets. Returns one line per inconsistency;
    /// empty means every order sits in exactly the bucket of its state.
    pub fn audit(&self) -> Vec<String> {
        let map = self.orders.read();
        let mut problems = Vec::new();
        for (state, bucket) in &self.buckets {
            for id in bucket.snapshot() {
                match map.get(&id) {
                    None => problems.push(format!("{id} in {state} bucket but not in map")),
                    Some(o) if o.state() != *state => problems.push(format!(
                        "{id} in {state} bucket but order is {}",
                        o.state()
                    )),
                    _ => {}
                }
            }
        }
        for (id, o) in map.iter() {
            let homes: Vec<_> = self
                .buckets
                .iter()
                .filter(|(_, b)| b.contains(*id))
                .map(|(s, _)| *s)
                .collect();
            if homes != [o.state()] {
                problems.push(format!("{id} ({}) found in buckets {homes:?}", o.state()));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frb_db::MemoryStorage;
    use frb_schemas::{FederationUser, OrderEvent, ResourceSpec, VolumeSpec};

    fn order() -> Order {
        Order::new(
            "a",
            "a",
            "sim",
            FederationUser::new("u", "idp", "n"),
            ResourceSpec::Volume(VolumeSpec {
                name: "v".into(),
                size_gb: 1,
            }),
        )
    }

    fn registry() -> OrderRegistry {
        OrderRegistry::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn activate_rejects_duplicates_and_non_open_orders() {
        let reg = registry();
        let o = order();
        reg.activate(o.clone()).await.unwrap();
        assert!(matches!(
            reg.activate(o.clone()).await,
            Err(RegistryError::DuplicateOrder(_))
        ));

        let mut failed = order();
        failed
            .apply(&OrderEvent::Rejected { reason: "x".into() })
            .unwrap();
        assert!(matches!(
            reg.activate(failed).await,
            Err(RegistryError::Bucket(_))
        ));
        assert_eq!(reg.len(), 1);
        assert!(reg.audit().is_empty());
    }

    #[tokio::test]
    async fn stale_commit_is_refused_and_changes_nothing() {
        let reg = registry();
        let o = order();
        reg.activate(o.clone()).await.unwrap();

        let mut first = reg.next_in(OrderState::Open).unwrap();
        first
            .apply(&OrderEvent::Submitted { instance_id: None })
            .unwrap();
        reg.commit(&first, OrderState::Open).await.unwrap();

        // A second copy checked out before the first commit is now stale.
        let mut second = o.clone();
        second
            .apply(&OrderEvent::Rejected { reason: "late".into() })
            .unwrap();
        let err = reg.commit(&second, OrderState::Open).await.unwrap_err();
        assert!(matches!(err, RegistryError::Stale { actual: OrderState::Spawning, .. }));
        assert_eq!(reg.get(o.id()).unwrap().state(), OrderState::Spawning);
        assert!(reg.audit().is_empty());
    }

    #[tokio::test]
    async fn next_in_skips_ids_that_moved_on() {
        let reg = registry();
        let a = order();
        let b = order();
        reg.activate(a.clone()).await.unwrap();
        reg.activate(b.clone()).await.unwrap();

        let mut first = reg.next_in(OrderState::Open).unwrap();
        assert_eq!(first.id(), a.id());
        first
            .apply(&OrderEvent::Submitted { instance_id: None })
            .unwrap();
        reg.commit(&first, OrderState::Open).await.unwrap();

        assert_eq!(reg.next_in(OrderState::Open).map(|o| o.id()), Some(b.id()));
        assert!(reg.next_in(OrderState::Open).is_none());
        assert_eq!(reg.next_in(OrderState::Spawning).map(|o| o.id()), Some(a.id()));
    }

    #[tokio::test]
    async fn closing_removes_from_memory_and_notifies() {
        let reg = registry();
        let mut rx = reg.subscribe();
        let mut o = order();
        reg.activate(o.clone()).await.unwrap();

        o.apply(&OrderEvent::Rejected { reason: "x".into() }).unwrap();
        reg.commit(&o, OrderState::Open).await.unwrap();
        o.apply(&OrderEvent::Released).unwrap();
        reg.commit(&o, OrderState::Failed).await.unwrap();

        assert!(reg.get(o.id()).is_none());
        assert!(reg.counts().values().all(|n| *n == 0));

        let seen: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|t| (t.from, t.to))
            .collect();
        assert_eq!(
            seen,
            vec![
                (None, OrderState::Open),
                (Some(OrderState::Open), OrderState::Failed),
                (Some(OrderState::Failed), OrderState::Closed),
            ]
        );
    }

    #[test]
    fn registry_errors_map_onto_the_taxonomy() {
        let id = OrderId::new();
        assert!(matches!(
            BrokerError::from(RegistryError::UnknownOrder(id)),
            BrokerError::InstanceNotFound(_)
        ));
        assert!(matches!(
            BrokerError::from(RegistryError::DuplicateOrder(id)),
            BrokerError::InvalidParameter(_)
        ));
        assert!(matches!(
            BrokerError::from(RegistryError::Stale {
                id,
                expected: OrderState::Open,
                actual: OrderState::Failed
            }),
            BrokerError::UnacceptableOperation(_)
        ));
    }
}
