//! A locally provided order walks OPEN → SPAWNING → FULFILLED under the
//! workers, then administrative deletion closes it and frees the instance.

use std::time::Duration;

use frb_cloud_sim::SimSettings;
use frb_schemas::OrderState;
use frb_testkit::{alice, compute_spec, TestBroker};

#[tokio::test]
async fn local_order_is_fulfilled_then_closed_by_delete() -> anyhow::Result<()> {
    let broker = TestBroker::standalone(
        "broker-a",
        SimSettings {
            ready_after_polls: 2,
            max_instances: 10,
        },
    )
    .await?;
    let id = broker.open(None, compute_spec(2)).await?;
    broker.runtime.start_workers();

    let fulfilled = broker
        .wait_for(id, OrderState::Fulfilled, Duration::from_secs(5))
        .await?;
    assert!(fulfilled.fulfilled_at().is_some());
    assert_eq!(fulfilled.actual_allocation().map(|a| a.vcpu), Some(2));
    assert_eq!(broker.cloud.instance_count(), 1);

    let instance = broker.runtime.controller().get_instance(id, &alice()).await?;
    assert!(instance.is_ready());

    broker.runtime.controller().delete_order(id, &alice()).await?;
    assert_eq!(broker.state_of(id).await?, Some(OrderState::Closed));
    assert_eq!(broker.cloud.instance_count(), 0);
    assert!(broker.runtime.registry().get(id).is_none());
    assert!(broker.runtime.registry().audit().is_empty());

    let history: Vec<OrderState> = broker
        .runtime
        .registry()
        .storage()
        .state_history(id)
        .await?
        .into_iter()
        .map(|c| c.state)
        .collect();
    assert_eq!(
        history,
        vec![
            OrderState::Open,
            OrderState::Spawning,
            OrderState::Fulfilled,
            OrderState::Closed
        ]
    );

    broker.runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn quota_rejection_fails_and_the_failed_worker_closes() -> anyhow::Result<()> {
    let broker = TestBroker::standalone(
        "broker-a",
        SimSettings {
            ready_after_polls: 1,
            max_instances: 0,
        },
    )
    .await?;
    let id = broker.open(None, compute_spec(1)).await?;
    broker.runtime.start_workers();

    let closed = broker
        .wait_for(id, OrderState::Closed, Duration::from_secs(5))
        .await?;
    assert!(closed.instance_id().is_none());
    assert!(closed.fault_message().is_some());

    broker.runtime.shutdown().await;
    Ok(())
}
