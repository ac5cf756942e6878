use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frb_schemas::{Order, OrderId, OrderState};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::{StableStorage, StateChange, StorageError};

/// SQLite-backed order store.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `url` and run migrations.
    ///
    /// In-memory URLs are pinned to one connection; every SQLite in-memory
    /// connection is otherwise its own database.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "order store ready");
        Ok(store)
    }

    /// Connect using `FRB_DATABASE_URL`.
    pub async fn connect_from_env() -> Result<Self, StorageError> {
        let url = std::env::var(crate::ENV_DB_URL).map_err(|_| {
            StorageError::Unavailable(format!("missing env var {}", crate::ENV_DB_URL))
        })?;
        Self::connect(&url).await
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_row(id: &str, state_col: &str, order_json: &str) -> Result<Order, StorageError> {
    let order: Order = serde_json::from_str(order_json)?;
    // The denormalised column and the record must agree.
    if order.state().as_str() != state_col {
        return Err(StorageError::Corrupt {
            id: id.to_string(),
            reason: format!(
                "state column {state_col} disagrees with record state {}",
                order.state()
            ),
        });
    }
    Ok(order)
}

#[async_trait]
impl StableStorage for SqliteStorage {
    async fn persist_new(&self, order: &Order) -> Result<(), StorageError> {
        let now = Utc::now();
        let json = serde_json::to_string(order)?;
        let id = order.id().to_string();

        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            insert into orders (
              id, state, resource_type, requester, provider, cloud_name,
              instance_id, order_json, created_at, updated_at
            ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            on conflict (id) do nothing
            "#,
        )
        .bind(&id)
        .bind(order.state().as_str())
        .bind(order.resource_type().as_str())
        .bind(order.requester())
        .bind(order.provider())
        .bind(order.cloud_name())
        .bind(order.instance_id())
        .bind(&json)
        .bind(order.created_at())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Duplicate(order.id()));
        }

        sqlx::query("insert into order_state_changes (order_id, state, changed_at) values (?, ?, ?)")
            .bind(&id)
            .bind(order.state().as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(order_id = %id, state = %order.state(), "persisted new order");
        Ok(())
    }

    async fn persist_update(
        &self,
        order: &Order,
        state_changed: bool,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        let json = serde_json::to_string(order)?;
        let id = order.id().to_string();

        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            update orders
               set state = ?, instance_id = ?, order_json = ?, updated_at = ?
             where id = ?
            "#,
        )
        .bind(order.state().as_str())
        .bind(order.instance_id())
        .bind(&json)
        .bind(now)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Missing(order.id()));
        }

        if state_changed {
            sqlx::query(
                "insert into order_state_changes (order_id, state, changed_at) values (?, ?, ?)",
            )
            .bind(&id)
            .bind(order.state().as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_active(&self, state: OrderState) -> Result<Vec<Order>, StorageError> {
        let rows = sqlx::query("select id, state, order_json from orders where state = ? order by rowid")
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| -> Result<Order, StorageError> {
                let id: String = r.try_get("id")?;
                let st: String = r.try_get("state")?;
                let json: String = r.try_get("order_json")?;
                decode_row(&id, &st, &json)
            })
            .collect()
    }

    async fn load(&self, id: OrderId) -> Result<Option<Order>, StorageError> {
        let row = sqlx::query("select id, state, order_json from orders where id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(r) => {
                let id: String = r.try_get("id")?;
                let st: String = r.try_get("state")?;
                let json: String = r.try_get("order_json")?;
                decode_row(&id, &st, &json).map(Some)
            }
        }
    }

    async fn state_history(&self, id: OrderId) -> Result<Vec<StateChange>, StorageError> {
        let rows = sqlx::query(
            "select state, changed_at from order_state_changes where order_id = ? order by seq",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<StateChange, StorageError> {
                let st: String = r.try_get("state")?;
                let at: DateTime<Utc> = r.try_get("changed_at")?;
                let state = OrderState::parse(&st).ok_or_else(|| StorageError::Corrupt {
                    id: id.to_string(),
                    reason: format!("unknown state '{st}' in history"),
                })?;
                Ok(StateChange { state, at })
            })
            .collect()
    }
}
