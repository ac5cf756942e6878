//! Order lifecycle states.
//!
//! ```text
//!   OPEN ──► SPAWNING ──► FULFILLED ──► CLOSED
//!     │          │            │           ▲
//!     └──────────┴────────────┴─► FAILED ─┘
//! ```

use serde::{Deserialize, Serialize};

/// Every state an order can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Accepted, provisioning not yet requested.
    Open,
    /// Provisioning requested; waiting for the instance to become ready.
    Spawning,
    /// Instance is ready and in use.
    Fulfilled,
    /// Provisioning or the instance failed; partial resources still to release.
    Failed,
    /// Released. **Terminal.**
    Closed,
}

impl OrderState {
    /// States that own a registry bucket and a reconciliation worker.
    pub const ACTIVE: [OrderState; 4] = [
        OrderState::Open,
        OrderState::Spawning,
        OrderState::Fulfilled,
        OrderState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Open => "OPEN",
            OrderState::Spawning => "SPAWNING",
            OrderState::Fulfilled => "FULFILLED",
            OrderState::Failed => "FAILED",
            OrderState::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(OrderState::Open),
            "SPAWNING" => Some(OrderState::Spawning),
            "FULFILLED" => Some(OrderState::Fulfilled),
            "FAILED" => Some(OrderState::Failed),
            "CLOSED" => Some(OrderState::Closed),
            _ => None,
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Closed)
    }

    /// The lifecycle edges. Anything not listed here is illegal, including
    /// self-loops.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Open, Spawning)
                | (Open, Failed)
                | (Spawning, Fulfilled)
                | (Spawning, Failed)
                | (Fulfilled, Failed)
                | (Fulfilled, Closed)
                | (Failed, Closed)
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderState; 5] = [
        OrderState::Open,
        OrderState::Spawning,
        OrderState::Fulfilled,
        OrderState::Failed,
        OrderState::Closed,
    ];

    #[test]
    fn closed_has_no_outgoing_edges() {
        for next in ALL {
            assert!(!OrderState::Closed.can_transition_to(next), "CLOSED -> {next}");
        }
    }

    #[test]
    fn failed_is_reachable_from_every_live_state_but_itself() {
        assert!(OrderState::Open.can_transition_to(OrderState::Failed));
        assert!(OrderState::Spawning.can_transition_to(OrderState::Failed));
        assert!(OrderState::Fulfilled.can_transition_to(OrderState::Failed));
        assert!(!OrderState::Failed.can_transition_to(OrderState::Failed));
    }

    #[test]
    fn no_skipping_spawning() {
        assert!(!OrderState::Open.can_transition_to(OrderState::Fulfilled));
        assert!(!OrderState::Open.can_transition_to(OrderState::Closed));
        assert!(!OrderState::Spawning.can_transition_to(OrderState::Closed));
    }

    #[test]
    fn as_str_parse_agree() {
        for s in ALL {
            assert_eq!(OrderState::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderState::parse("open"), None);
    }

    #[test]
    fn only_closed_is_terminal() {
        let terminal: Vec<_> = ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![&OrderState::Closed]);
        assert!(!OrderState::ACTIVE.contains(&OrderState::Closed));
    }
}
