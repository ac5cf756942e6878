//! An unreachable provider is a transient failure: the order stays OPEN and
//! the next pass after the partition heals hands it over.

use std::time::Duration;

use frb_cloud_sim::SimSettings;
use frb_schemas::{BrokerError, OrderState};
use frb_testkit::{alice, volume_spec, Federation};

#[tokio::test]
async fn partitioned_provider_leaves_the_order_open_until_healed() -> anyhow::Result<()> {
    let fed = Federation::new(
        &["broker-a", "broker-b"],
        SimSettings::default(),
        Duration::from_millis(150),
    )
    .await?;
    let a = fed.broker("broker-a")?;
    let b = fed.broker("broker-b")?;
    let id = a.open(Some("broker-b"), volume_spec(1)).await?;

    fed.network.partition("broker-b");
    for _ in 0..2 {
        let report = a.runtime.processor().run_pass(OrderState::Open).await;
        assert_eq!((report.visited, report.retained), (1, 1));
    }
    assert_eq!(a.state_of(id).await?, Some(OrderState::Open));
    assert_eq!(b.state_of(id).await?, None);

    let err = a
        .runtime
        .controller()
        .get_cloud_names("broker-b", &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnavailableProvider(_)), "got {err:?}");

    fed.network.heal("broker-b");
    let report = a.runtime.processor().run_pass(OrderState::Open).await;
    assert_eq!(report.advanced, 1);
    assert_eq!(a.state_of(id).await?, Some(OrderState::Spawning));
    assert_eq!(b.state_of(id).await?, Some(OrderState::Open));

    fed.shutdown().await;
    Ok(())
}
