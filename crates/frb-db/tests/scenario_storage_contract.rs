//! Both storage backends honour the same contract.
//!
//! GREEN when, for SQLite and in-memory alike:
//! - persist_new rejects a duplicate id;
//! - persist_update rejects an unknown id;
//! - load_active returns exactly the orders in that state, oldest first;
//! - a file-backed SQLite store survives a reconnect.

use std::sync::Arc;

use frb_db::{MemoryStorage, SqliteStorage, StableStorage, StorageError};
use frb_schemas::{
    FederationUser, Order, OrderEvent, OrderState, ResourceSpec, VolumeSpec,
};

fn volume(name: &str) -> Order {
    Order::new(
        "broker-a",
        "broker-a",
        "sim",
        FederationUser::new("u1", "idp", "alice"),
        ResourceSpec::Volume(VolumeSpec {
            name: name.into(),
            size_gb: 5,
        }),
    )
}

async fn backends() -> Vec<(&'static str, Arc<dyn StableStorage>)> {
    let sqlite = SqliteStorage::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    vec![
        ("sqlite", Arc::new(sqlite) as Arc<dyn StableStorage>),
        ("memory", Arc::new(MemoryStorage::new()) as Arc<dyn StableStorage>),
    ]
}

#[tokio::test]
async fn duplicate_insert_is_rejected() -> anyhow::Result<()> {
    for (name, store) in backends().await {
        let o = volume("v1");
        store.persist_new(&o).await?;
        let err = store.persist_new(&o).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(id) if id == o.id()), "{name}: {err}");
    }
    Ok(())
}

#[tokio::test]
async fn update_of_unknown_order_is_rejected() -> anyhow::Result<()> {
    for (name, store) in backends().await {
        let o = volume("ghost");
        let err = store.persist_update(&o, true).await.unwrap_err();
        assert!(matches!(err, StorageError::Missing(_)), "{name}: {err}");
    }
    Ok(())
}

#[tokio::test]
async fn load_active_partitions_by_state_in_insertion_order() -> anyhow::Result<()> {
    for (name, store) in backends().await {
        let a = volume("a");
        let mut b = volume("b");
        let c = volume("c");
        store.persist_new(&a).await?;
        store.persist_new(&b).await?;
        store.persist_new(&c).await?;

        b.apply(&OrderEvent::Submitted {
            instance_id: Some("vol-b".into()),
        })?;
        store.persist_update(&b, true).await?;

        let open: Vec<_> = store
            .load_active(OrderState::Open)
            .await?
            .iter()
            .map(|o| o.id())
            .collect();
        assert_eq!(open, vec![a.id(), c.id()], "{name}");

        let spawning = store.load_active(OrderState::Spawning).await?;
        assert_eq!(spawning.len(), 1, "{name}");
        assert_eq!(spawning[0].instance_id(), Some("vol-b"), "{name}");

        let hist = store.state_history(b.id()).await?;
        let states: Vec<_> = hist.iter().map(|c| c.state).collect();
        assert_eq!(states, vec![OrderState::Open, OrderState::Spawning], "{name}");
        assert!(hist[0].at <= hist[1].at, "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn closed_orders_stay_loadable_but_are_not_active() -> anyhow::Result<()> {
    for (name, store) in backends().await {
        let mut o = volume("done");
        store.persist_new(&o).await?;
        o.apply(&OrderEvent::Rejected {
            reason: "quota".into(),
        })?;
        store.persist_update(&o, true).await?;
        o.apply(&OrderEvent::Released)?;
        store.persist_update(&o, true).await?;

        for st in OrderState::ACTIVE {
            assert!(store.load_active(st).await?.is_empty(), "{name}: {st}");
        }
        let back = store.load(o.id()).await?.expect("closed order retained");
        assert_eq!(back.state(), OrderState::Closed, "{name}");
        assert_eq!(back.fault_message(), Some("quota"), "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn file_backed_store_survives_reconnect() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("orders.db").display());

    let o = volume("durable");
    {
        let store = SqliteStorage::connect(&url).await?;
        store.persist_new(&o).await?;
        store.pool().close().await;
    }

    let store = SqliteStorage::connect(&url).await?;
    let open = store.load_active(OrderState::Open).await?;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0], o);
    Ok(())
}
