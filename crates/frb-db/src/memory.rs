use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use frb_schemas::{Order, OrderId, OrderState};
use parking_lot::Mutex;

use crate::{StableStorage, StateChange, StorageError};

#[derive(Default)]
struct Inner {
    orders: HashMap<OrderId, Order>,
    /// Insertion order, for `load_active`.
    seq: Vec<OrderId>,
    history: HashMap<OrderId, Vec<StateChange>>,
}

/// In-process store with the same contract as [`crate::SqliteStorage`].
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StableStorage for MemoryStorage {
    async fn persist_new(&self, order: &Order) -> Result<(), StorageError> {
        let mut g = self.inner.lock();
        if g.orders.contains_key(&order.id()) {
            return Err(StorageError::Duplicate(order.id()));
        }
        g.orders.insert(order.id(), order.clone());
        g.seq.push(order.id());
        g.history.insert(
            order.id(),
            vec![StateChange {
                state: order.state(),
                at: Utc::now(),
            }],
        );
        Ok(())
    }

    async fn persist_update(
        &self,
        order: &Order,
        state_changed: bool,
    ) -> Result<(), StorageError> {
        let mut g = self.inner.lock();
        let Some(slot) = g.orders.get_mut(&order.id()) else {
            return Err(StorageError::Missing(order.id()));
        };
        *slot = order.clone();
        if state_changed {
            g.history.entry(order.id()).or_default().push(StateChange {
                state: order.state(),
                at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn load_active(&self, state: OrderState) -> Result<Vec<Order>, StorageError> {
        let g = self.inner.lock();
        Ok(g.seq
            .iter()
            .filter_map(|id| g.orders.get(id))
            .filter(|o| o.state() == state)
            .cloned()
            .collect())
    }

    async fn load(&self, id: OrderId) -> Result<Option<Order>, StorageError> {
        Ok(self.inner.lock().orders.get(&id).cloned())
    }

    async fn state_history(&self, id: OrderId) -> Result<Vec<StateChange>, StorageError> {
        Ok(self
            .inner
            .lock()
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}
