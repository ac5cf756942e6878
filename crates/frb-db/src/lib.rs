//! Stable storage for orders.
//!
//! The registry depends only on [`StableStorage`]. Two implementations ship:
//! [`SqliteStorage`] (sqlx, embedded migrations) for the daemon and
//! [`MemoryStorage`] for tests and throwaway brokers.
//!
//! Contract:
//! - `persist_new` fails with [`StorageError::Duplicate`] if the id exists.
//! - `persist_update` fails with [`StorageError::Missing`] if it does not.
//! - `persist_update(.., state_changed = true)` appends to the state history.
//! - `load_active(state)` returns orders in insertion order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frb_schemas::{Order, OrderId, OrderState};

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

pub const ENV_DB_URL: &str = "FRB_DATABASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("order {0} already persisted")]
    Duplicate(OrderId),
    #[error("order {0} not found in storage")]
    Missing(OrderId),
    #[error("storage backend failure: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("storage migration failure: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("order record codec failure: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("corrupt order record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    /// Injected or otherwise unclassified failure.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A persisted state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub state: OrderState,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait StableStorage: Send + Sync {
    async fn persist_new(&self, order: &Order) -> Result<(), StorageError>;

    async fn persist_update(&self, order: &Order, state_changed: bool)
        -> Result<(), StorageError>;

    async fn load_active(&self, state: OrderState) -> Result<Vec<Order>, StorageError>;

    async fn load(&self, id: OrderId) -> Result<Option<Order>, StorageError>;

    async fn state_history(&self, id: OrderId) -> Result<Vec<StateChange>, StorageError>;
}
