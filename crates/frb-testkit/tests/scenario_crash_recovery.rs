//! Restart from a file-backed store: every active order comes back in the
//! bucket of its last durable state.

use std::sync::Arc;

use frb_cloud_sim::SimSettings;
use frb_db::SqliteStorage;
use frb_schemas::OrderState;
use frb_testkit::{alice, volume_spec, TestBroker};

fn slow_cloud() -> SimSettings {
    SimSettings {
        ready_after_polls: 1_000,
        max_instances: 10,
    }
}

#[tokio::test]
async fn active_orders_are_recovered_into_their_buckets() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("orders.db").display());

    let (spawning, open, failed) = {
        let storage = SqliteStorage::connect(&url).await?;
        let broker = TestBroker::assemble("broker-a", Arc::new(storage), slow_cloud(), None).await?;

        let spawning = broker.open(None, volume_spec(1)).await?;
        broker.runtime.processor().run_pass(OrderState::Open).await;

        let open = broker.open(None, volume_spec(2)).await?;
        let failed = broker.open(None, volume_spec(3)).await?;
        broker.runtime.controller().delete_order(failed, &alice()).await?;

        assert_eq!(broker.state_of(spawning).await?, Some(OrderState::Spawning));
        assert_eq!(broker.state_of(failed).await?, Some(OrderState::Failed));
        (spawning, open, failed)
    };

    // "Restart": fresh process state over the same file.
    let storage = SqliteStorage::connect(&url).await?;
    let broker = TestBroker::assemble("broker-a", Arc::new(storage), slow_cloud(), None).await?;
    let reg = broker.runtime.registry();

    assert_eq!(reg.len(), 3);
    assert_eq!(reg.ids_in(OrderState::Open), vec![open]);
    assert_eq!(reg.ids_in(OrderState::Spawning), vec![spawning]);
    assert_eq!(reg.ids_in(OrderState::Failed), vec![failed]);
    assert!(reg.ids_in(OrderState::Fulfilled).is_empty());
    assert!(reg.audit().is_empty(), "{:?}", reg.audit());

    let recovered = reg.get(spawning).expect("spawning order recovered");
    assert!(recovered.instance_id().is_some());
    assert_eq!(
        reg.get(failed).and_then(|o| o.fault_message().map(str::to_string)),
        Some("deletion requested".to_string())
    );

    // The recovered FAILED order is released and closed by the next pass.
    broker.runtime.processor().run_pass(OrderState::Failed).await;
    assert_eq!(broker.state_of(failed).await?, Some(OrderState::Closed));
    assert!(reg.get(failed).is_none());
    Ok(())
}
