//! Request and response types for frb-daemon HTTP endpoints.
//!
//! No business logic lives here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub provider: String,
}

// ---------------------------------------------------------------------------
// Refusals
// ---------------------------------------------------------------------------

/// Body of every non-2xx daemon response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable reason: "unauthenticated" | "federation_disabled" | "bad_packet".
    pub reason: String,
}

impl ErrorResponse {
    pub fn new(reason: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/federation/packets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketAccepted {
    pub accepted: bool,
}
