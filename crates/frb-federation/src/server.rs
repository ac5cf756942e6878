//! Inbound side: the receive-dispatch loop.
//!
//! Responses resolve pending calls. Requests are decoded, served by the
//! local [`RemoteRequestHandler`] on their own task, and answered with
//! either the encoded reply or a wire error condition.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::call::{RemoteCall, RemoteReply};
use crate::correlation::PendingCalls;
use crate::errors::{classify, ErrorCondition};
use crate::message::{Outcome, Packet, RemoteRequest, RemoteResponse};
use crate::transport::PacketTransport;

/// The local operations a peer may invoke.
#[async_trait]
pub trait RemoteRequestHandler: Send + Sync {
    /// `from` is the originating provider as named in the request.
    ///
    /// Return a `BrokerError` (wrapped in anyhow) to send its condition;
    /// anything else is reported as a communication error.
    async fn handle(&self, from: &str, call: RemoteCall) -> anyhow::Result<RemoteReply>;
}

#[derive(Clone)]
pub struct FederationEndpoint {
    local: String,
    pending: Arc<PendingCalls>,
    transport: Arc<dyn PacketTransport>,
    handler: Arc<dyn RemoteRequestHandler>,
}

impl FederationEndpoint {
    pub fn new(
        local: impl Into<String>,
        pending: Arc<PendingCalls>,
        transport: Arc<dyn PacketTransport>,
        handler: Arc<dyn RemoteRequestHandler>,
    ) -> Self {
        Self {
            local: local.into(),
            pending,
            transport,
            handler,
        }
    }

    /// Route one inbound packet. Never blocks on the handler.
    pub fn dispatch(&self, packet: Packet) {
        if packet.to() != self.local {
            warn!(to = %packet.to(), local = %self.local, "packet addressed elsewhere; dropped");
            return;
        }
        match packet {
            Packet::Response(r) => {
                self.pending.resolve(r);
            }
            Packet::Request(req) => {
                let this = self.clone();
                tokio::spawn(async move {
                    let to = req.from.clone();
                    let response = this.serve_request(req).await;
                    if let Err(e) = this.transport.send(Packet::Response(response)).await {
                        warn!(peer = %to, error = %e, "could not deliver response");
                    }
                });
            }
        }
    }

    /// Decode, invoke and encode one request.
    pub async fn serve_request(&self, req: RemoteRequest) -> RemoteResponse {
        let outcome = match RemoteCall::decode(req.method, &req.fields) {
            Err(e) => {
                debug!(request_id = %req.id, method = %req.method, error = %e, "undecodable request");
                Outcome::Err {
                    condition: ErrorCondition::BadRequest,
                    message: Some(e.to_string()),
                }
            }
            Ok(call) => match self.handler.handle(&req.from, call).await {
                Ok(reply) => match reply.encode() {
                    Ok(fields) => Outcome::Ok { fields },
                    Err(e) => {
                        let (condition, message) = classify(&anyhow::Error::new(e));
                        Outcome::Err {
                            condition,
                            message: Some(message),
                        }
                    }
                },
                Err(e) => {
                    let (condition, message) = classify(&e);
                    debug!(request_id = %req.id, method = %req.method, ?condition, "remote request refused");
                    Outcome::Err {
                        condition,
                        message: Some(message),
                    }
                }
            },
        };

        RemoteResponse {
            id: req.id,
            from: self.local.clone(),
            to: req.from,
            outcome,
        }
    }

    /// Drain `inbox` until it closes or `shutdown` flips to true.
    pub fn spawn_receive_loop(
        self,
        mut inbox: mpsc::UnboundedReceiver<Packet>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(provider = %self.local, "federation receive loop started");
            loop {
                tokio::select! {
                    maybe = inbox.recv() => match maybe {
                        Some(p) => self.dispatch(p),
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(provider = %self.local, "federation receive loop stopped");
        })
    }
}
