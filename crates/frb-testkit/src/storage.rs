//! Stable storage with switchable failures, for write-ahead tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use frb_db::{MemoryStorage, StableStorage, StateChange, StorageError};
use frb_schemas::{Order, OrderId, OrderState};

/// Wraps another store. While a failure switch is on, the matching write
/// returns [`StorageError::Unavailable`] without touching the inner store.
pub struct FlakyStorage {
    inner: Arc<dyn StableStorage>,
    fail_new: AtomicBool,
    fail_updates: AtomicBool,
    refused: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: Arc<dyn StableStorage>) -> Self {
        Self {
            inner,
            fail_new: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            refused: AtomicUsize::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn fail_new(&self, on: bool) {
        self.fail_new.store(on, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, on: bool) {
        self.fail_updates.store(on, Ordering::SeqCst);
    }

    /// Writes refused so far.
    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    fn refuse(&self, what: &str) -> StorageError {
        self.refused.fetch_add(1, Ordering::SeqCst);
        StorageError::Unavailable(format!("injected {what} failure"))
    }
}

#[async_trait]
impl StableStorage for FlakyStorage {
    async fn persist_new(&self, order: &Order) -> Result<(), StorageError> {
        if self.fail_new.load(Ordering::SeqCst) {
            return Err(self.refuse("persist_new"));
        }
        self.inner.persist_new(order).await
    }

    async fn persist_update(&self, order: &Order, state_changed: bool) -> Result<(), StorageError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(self.refuse("persist_update"));
        }
        self.inner.persist_update(order, state_changed).await
    }

    async fn load_active(&self, state: OrderState) -> Result<Vec<Order>, StorageError> {
        self.inner.load_active(state).await
    }

    async fn load(&self, id: OrderId) -> Result<Option<Order>, StorageError> {
        self.inner.load(id).await
    }

    async fn state_history(&self, id: OrderId) -> Result<Vec<StateChange>, StorageError> {
        self.inner.state_history(id).await
    }
}
