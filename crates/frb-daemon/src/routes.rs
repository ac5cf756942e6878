//! HTTP surface of the daemon. Middleware is attached in `main.rs`, so tests
//! drive the bare router.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL},
        HeaderMap, StatusCode,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use frb_federation::{Packet, PACKETS_PATH};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::{
    api_types::{ErrorResponse, HealthResponse, PacketAccepted},
    state::{AppState, BusMsg, StatusSnapshot},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/stream", get(stream))
        .route(PACKETS_PATH, post(federation_packets))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: st.build.service.clone(),
        version: st.build.version.clone(),
        provider: st.runtime.local_id().to_string(),
    })
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

/// Also pushes the snapshot to stream subscribers.
pub(crate) async fn status(State(st): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    let snapshot = st.snapshot();
    let _ = st.bus.send(BusMsg::Status(snapshot.clone()));
    Json(snapshot)
}

// ---------------------------------------------------------------------------
// POST /v1/federation/packets
// ---------------------------------------------------------------------------

/// Inbound federation traffic. Requests are served asynchronously; the
/// response travels back as its own packet, so this only acknowledges.
pub(crate) async fn federation_packets(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(token) = st.federation_token.as_deref() {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(token) {
            warn!("federation packet refused: bad or missing bearer token");
            return refuse(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing or invalid federation token",
            );
        }
    }

    let Some(endpoint) = st.runtime.endpoint() else {
        return refuse(
            StatusCode::SERVICE_UNAVAILABLE,
            "federation_disabled",
            "this broker runs standalone",
        );
    };

    let packet: Packet = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "undecodable federation packet");
            return refuse(StatusCode::BAD_REQUEST, "bad_packet", e.to_string());
        }
    };

    endpoint.dispatch(packet);
    (StatusCode::ACCEPTED, Json(PacketAccepted { accepted: true })).into_response()
}

fn refuse(status: StatusCode, reason: &str, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(reason, error))).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let sse = Sse::new(bus_events(st.bus.subscribe()))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
    ([(CACHE_CONTROL, "no-cache")], sse).into_response()
}

/// Bus messages as SSE events. Lagged receivers skip what they missed.
fn bus_events(
    bus: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(bus).filter_map(|item| async move {
        let msg = item.ok()?;
        let json = serde_json::to_string(&msg).ok()?;
        Some(Ok(Event::default().event(msg.event_name()).data(json)))
    })
}
