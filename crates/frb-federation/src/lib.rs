//! Broker-to-broker remote invocation.
//!
//! Layers, bottom up: wire envelope ([`message`]), class-tagged payloads
//! ([`payload`]), typed calls and replies ([`call`]), error conditions
//! ([`errors`]), correlation ([`correlation`]), transports
//! ([`transport`]), then the outbound [`client`] and inbound [`server`].

pub mod call;
pub mod client;
pub mod correlation;
pub mod errors;
pub mod message;
pub mod payload;
pub mod server;
pub mod transport;

pub use call::{RemoteCall, RemoteReply};
pub use client::RemoteClient;
pub use correlation::PendingCalls;
pub use errors::{classify, condition_for, error_for, ErrorCondition};
pub use message::{
    CodecError, FieldName, Outcome, Packet, PacketFields, RemoteMethod, RemoteRequest,
    RemoteResponse, RequestId,
};
pub use payload::{Payload, PayloadTag};
pub use server::{FederationEndpoint, RemoteRequestHandler};
pub use transport::{
    HttpTransport, LoopbackNetwork, LoopbackTransport, PacketTransport, TransportError,
    PACKETS_PATH,
};
