//! Shared state for frb-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The broker runtime
//! owns the workers; this module only adds the SSE bus and its feeders.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use frb_orders::{OrderRegistry, Transition};
use frb_runtime::BrokerRuntime;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

// ---------------------------------------------------------------------------
// BusMsg (SSE event bus payload)
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    Transition(Transition),
    LogLine { level: String, msg: String },
}

impl BusMsg {
    /// SSE `event:` field for this message.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Status(_) => "status",
            BusMsg::Transition(_) => "transition",
            BusMsg::LogLine { .. } => "log",
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status and carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub provider: String,
    /// "STANDALONE" | "FEDERATED"
    pub mode: String,
    pub config_hash: Option<String>,
    pub active_orders: usize,
    /// Bucket sizes keyed by state name.
    pub buckets: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub runtime: Arc<BrokerRuntime>,
    /// Bearer token peers must present on the packet endpoint. `None`
    /// accepts unauthenticated packets.
    pub federation_token: Option<String>,
    pub config_hash: Option<String>,
}

impl AppState {
    pub fn new(runtime: Arc<BrokerRuntime>, federation_token: Option<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "frb-daemon".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            runtime,
            federation_token,
            config_hash: None,
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let registry = self.runtime.registry();
        StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            provider: self.runtime.local_id().to_string(),
            mode: if self.runtime.endpoint().is_some() {
                "FEDERATED"
            } else {
                "STANDALONE"
            }
            .to_string(),
            config_hash: self.config_hash.clone(),
            active_orders: registry.len(),
            buckets: registry
                .counts()
                .into_iter()
                .map(|(s, n)| (s.as_str().to_string(), n))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Emit a heartbeat on the bus every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Forward committed order transitions to the bus.
pub fn spawn_transition_relay(registry: &OrderRegistry, bus: broadcast::Sender<BusMsg>) {
    let mut rx = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(t) => {
                    let _ = bus.send(BusMsg::Transition(t));
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "transition relay lagged");
                    let _ = bus.send(BusMsg::LogLine {
                        level: "WARN".to_string(),
                        msg: format!("{n} order transitions dropped from stream"),
                    });
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
