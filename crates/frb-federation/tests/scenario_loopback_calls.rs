use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use frb_federation::{
    FederationEndpoint, LoopbackNetwork, PendingCalls, RemoteCall, RemoteClient, RemoteReply,
    RemoteRequestHandler,
};
use frb_schemas::{BrokerError, ErrorKind, FederationUser};
use tokio::sync::watch;

/// Answers get-cloud-names with a fixed list, or fails with the error kind
/// named by the user's `fail_with` attribute.
struct Scripted;

#[async_trait]
impl RemoteRequestHandler for Scripted {
    async fn handle(&self, from: &str, call: RemoteCall) -> anyhow::Result<RemoteReply> {
        match call {
            RemoteCall::GetCloudNames { user } => match user.attributes.get("fail_with") {
                None => Ok(RemoteReply::CloudNames(vec![
                    format!("for-{from}"),
                    "west".to_string(),
                ])),
                Some(k) if k == "foreign" => Err(anyhow::anyhow!("socket exploded")),
                Some(k) => {
                    let kind: ErrorKind = serde_json::from_value(serde_json::json!(k))?;
                    Err(BrokerError::from_kind(kind, format!("scripted {k}")).into())
                }
            },
            _ => Ok(RemoteReply::Empty),
        }
    }
}

struct Pair {
    net: LoopbackNetwork,
    client: RemoteClient,
    _stop: watch::Sender<bool>,
}

fn pair(timeout: Duration) -> Pair {
    let net = LoopbackNetwork::new();
    let (stop_tx, stop_rx) = watch::channel(false);

    let (a_tx, a_rx) = net.join("a");
    let (b_tx, b_rx) = net.join("b");
    let a_tx = Arc::new(a_tx);

    let a_pending = Arc::new(PendingCalls::new());
    FederationEndpoint::new("a", a_pending.clone(), a_tx.clone(), Arc::new(Scripted))
        .spawn_receive_loop(a_rx, stop_rx.clone());
    FederationEndpoint::new(
        "b",
        Arc::new(PendingCalls::new()),
        Arc::new(b_tx),
        Arc::new(Scripted),
    )
    .spawn_receive_loop(b_rx, stop_rx);

    Pair {
        net,
        client: RemoteClient::new("a", a_tx, a_pending, timeout),
        _stop: stop_tx,
    }
}

#[tokio::test]
async fn call_returns_the_providers_reply() -> anyhow::Result<()> {
    let p = pair(Duration::from_secs(5));
    let names = p
        .client
        .get_cloud_names("b", &FederationUser::new("u", "idp", "n"))
        .await?;
    assert_eq!(names, vec!["for-a".to_string(), "west".to_string()]);
    Ok(())
}

#[tokio::test]
async fn every_error_kind_survives_the_wire() -> anyhow::Result<()> {
    let p = pair(Duration::from_secs(5));
    for kind in ErrorKind::ALL {
        let tag = serde_json::to_value(kind)?;
        let user = FederationUser::new("u", "idp", "n")
            .with_attribute("fail_with", tag.as_str().unwrap_or_default());
        let err = p.client.get_cloud_names("b", &user).await.unwrap_err();
        assert_eq!(err.kind(), kind, "{err}");
        assert!(err.message().starts_with("scripted"), "{err}");
    }
    Ok(())
}

#[tokio::test]
async fn foreign_handler_errors_arrive_as_communication_errors() -> anyhow::Result<()> {
    let p = pair(Duration::from_secs(5));
    let user = FederationUser::new("u", "idp", "n").with_attribute("fail_with", "foreign");
    let err = p.client.get_cloud_names("b", &user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Communication);
    Ok(())
}

#[tokio::test]
async fn silent_peer_times_out_as_unavailable_provider() -> anyhow::Result<()> {
    let p = pair(Duration::from_millis(100));
    p.net.partition("b");
    let err = p
        .client
        .get_cloud_names("b", &FederationUser::new("u", "idp", "n"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnavailableProvider(_)), "{err}");

    p.net.heal("b");
    let names = p
        .client
        .get_cloud_names("b", &FederationUser::new("u", "idp", "n"))
        .await?;
    assert_eq!(names.len(), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_peer_is_unavailable_without_waiting() -> anyhow::Result<()> {
    let p = pair(Duration::from_secs(30));
    let started = std::time::Instant::now();
    let err = p
        .client
        .get_cloud_names("nobody", &FederationUser::new("u", "idp", "n"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnavailableProvider(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn undecodable_request_is_answered_with_bad_request() -> anyhow::Result<()> {
    use frb_federation::{
        ErrorCondition, Outcome, PacketFields, RemoteMethod, RemoteRequest, RequestId,
    };

    let net = LoopbackNetwork::new();
    let (b_tx, _b_rx) = net.join("b");
    let endpoint = FederationEndpoint::new(
        "b",
        Arc::new(PendingCalls::new()),
        Arc::new(b_tx),
        Arc::new(Scripted),
    );
    let resp = endpoint
        .serve_request(RemoteRequest {
            id: RequestId::new(),
            method: RemoteMethod::GetUserQuota,
            from: "a".into(),
            to: "b".into(),
            fields: PacketFields::new(),
        })
        .await;
    match resp.outcome {
        Outcome::Err { condition, message } => {
            assert_eq!(condition, ErrorCondition::BadRequest);
            assert!(message.unwrap_or_default().contains("cloud-name"));
        }
        other => panic!("expected an error outcome, got {other:?}"),
    }
    Ok(())
}

/// Counts error-level events seen by the current thread's subscriber.
#[derive(Clone, Default)]
struct ErrorEvents(Arc<std::sync::atomic::AtomicUsize>);

impl ErrorEvents {
    fn seen(&self) -> usize {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn only_foreign_handler_errors_are_logged_as_defects() -> anyhow::Result<()> {
    use frb_federation::{ErrorCondition, Outcome, RemoteRequest, RequestId};
    use tracing_subscriber::layer::SubscriberExt;

    let errors = ErrorEvents::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(errors.clone()));

    let net = LoopbackNetwork::new();
    let (b_tx, _b_rx) = net.join("b");
    let endpoint = FederationEndpoint::new(
        "b",
        Arc::new(PendingCalls::new()),
        Arc::new(b_tx),
        Arc::new(Scripted),
    );
    let request = |fail_with: &str| -> anyhow::Result<RemoteRequest> {
        let user = FederationUser::new("u", "idp", "n").with_attribute("fail_with", fail_with);
        let (method, fields) = RemoteCall::GetCloudNames { user }.encode()?;
        Ok(RemoteRequest {
            id: RequestId::new(),
            method,
            from: "a".into(),
            to: "b".into(),
            fields,
        })
    };

    let resp = endpoint.serve_request(request("unauthorized")?).await;
    assert!(matches!(
        resp.outcome,
        Outcome::Err { condition: ErrorCondition::Forbidden, .. }
    ));
    assert_eq!(errors.seen(), 0, "taxonomy errors are not defects");

    let resp = endpoint.serve_request(request("foreign")?).await;
    match resp.outcome {
        Outcome::Err { condition, message } => {
            assert_eq!(condition, ErrorCondition::CommunicationError);
            assert_eq!(message.as_deref(), Some("socket exploded"));
        }
        other => panic!("expected an error outcome, got {other:?}"),
    }
    assert_eq!(errors.seen(), 1);
    Ok(())
}
