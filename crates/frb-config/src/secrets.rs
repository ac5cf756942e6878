//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES. Values are read once at startup
//! and passed into constructors; errors name the variable, never the value.

use anyhow::{bail, Result};

use crate::BrokerConfig;

/// Secrets used on the federation link. Redacted in `Debug`.
#[derive(Clone, Default)]
pub struct FederationSecrets {
    /// Shared bearer token presented to and expected from peers.
    pub token: Option<String>,
}

impl std::fmt::Debug for FederationSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationSecrets")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve the federation token named by `federation.token_env`.
///
/// A configured-but-unset variable is an error; no `token_env` at all means
/// the link runs unauthenticated (loopback and tests).
pub fn resolve_federation_secrets(cfg: &BrokerConfig) -> Result<FederationSecrets> {
    let Some(var) = cfg.federation.token_env.as_deref() else {
        return Ok(FederationSecrets::default());
    };
    match resolve_env(var) {
        Some(token) => Ok(FederationSecrets { token: Some(token) }),
        None => bail!("SECRETS_MISSING: required env var '{var}' (federation token) is not set or empty"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let s = FederationSecrets {
            token: Some("super-secret-value".into()),
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("super-secret-value"));
        assert!(dbg.contains("<REDACTED>"));
    }
}
