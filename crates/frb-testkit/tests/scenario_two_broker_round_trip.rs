//! Requester A, provider B, joined over the loopback federation network.

use std::time::Duration;

use frb_cloud_sim::SimSettings;
use frb_schemas::{BrokerError, OrderState};
use frb_testkit::{alice, compute_spec, volume_spec, Federation};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn remote_order_is_fulfilled_on_both_sides_and_delete_closes_both() -> anyhow::Result<()> {
    let fed = Federation::new(
        &["broker-a", "broker-b"],
        SimSettings::default(),
        Duration::from_secs(2),
    )
    .await?;
    let a = fed.broker("broker-a")?;
    let b = fed.broker("broker-b")?;

    let id = a.open(Some("broker-b"), volume_spec(8)).await?;
    fed.start_workers();

    let on_b = b.wait_for(id, OrderState::Fulfilled, WAIT).await?;
    assert_eq!(on_b.requester(), "broker-a");
    assert!(on_b.instance_id().is_some());

    let on_a = a.wait_for(id, OrderState::Fulfilled, WAIT).await?;
    assert!(on_a.instance_id().is_none(), "instance ids live on the provider");
    assert!(on_a.fulfilled_at().is_some());
    assert_eq!(a.cloud.instance_count(), 0);
    assert_eq!(b.cloud.instance_count(), 1);

    // Lookups through A are answered by B.
    let instance = a.runtime.controller().get_instance(id, &alice()).await?;
    assert!(instance.is_ready());
    assert_eq!(Some(instance.id.as_str()), on_b.instance_id());

    a.runtime.controller().delete_order(id, &alice()).await?;
    a.wait_for(id, OrderState::Closed, WAIT).await?;
    b.wait_for(id, OrderState::Closed, WAIT).await?;
    assert_eq!(b.cloud.instance_count(), 0);

    fed.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn catalog_calls_reach_the_peer() -> anyhow::Result<()> {
    let fed = Federation::new(
        &["broker-a", "broker-b"],
        SimSettings::default(),
        Duration::from_secs(2),
    )
    .await?;
    let c = fed.broker("broker-a")?.runtime.controller();

    assert_eq!(
        c.get_cloud_names("broker-b", &alice()).await?,
        vec!["sim".to_string()]
    );
    let images = c.get_all_images("broker-b", "sim", &alice()).await?;
    assert!(images.iter().any(|i| i.id == "img-ubuntu"));

    let quota = c.get_user_quota("broker-b", "sim", &alice()).await?;
    assert_eq!(quota.used.instances, 0);

    let err = c
        .get_image("broker-b", "sim", "img-missing", &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::InstanceNotFound(_)), "got {err:?}");

    fed.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn provider_refusal_crosses_the_wire_and_fails_the_order() -> anyhow::Result<()> {
    let fed = Federation::new(
        &["broker-a", "broker-b"],
        SimSettings::default(),
        Duration::from_secs(2),
    )
    .await?;
    let a = fed.broker("broker-a")?;
    let b = fed.broker("broker-b")?;

    let c = a.runtime.controller();
    let order = c.new_order(alice(), volume_spec(1), Some("broker-b"), Some("no-such-cloud"));
    let id = c.activate(order).await?;
    fed.start_workers();

    let closed = a.wait_for(id, OrderState::Closed, WAIT).await?;
    let fault = closed.fault_message().unwrap_or_default();
    assert!(fault.contains("no-such-cloud"), "fault was {fault:?}");
    assert_eq!(b.state_of(id).await?, None, "provider never accepted it");

    fed.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn provider_side_failure_is_notified_to_the_requester() -> anyhow::Result<()> {
    let fed = Federation::new(
        &["broker-a", "broker-b"],
        SimSettings {
            ready_after_polls: 1,
            max_instances: 0,
        },
        Duration::from_secs(2),
    )
    .await?;
    let a = fed.broker("broker-a")?;
    let b = fed.broker("broker-b")?;

    let id = a.open(Some("broker-b"), compute_spec(1)).await?;
    fed.start_workers();

    let on_a = a.wait_for(id, OrderState::Closed, WAIT).await?;
    assert!(on_a.fault_message().is_some());
    b.wait_for(id, OrderState::Closed, WAIT).await?;

    fed.shutdown().await;
    Ok(())
}
