//! Typed view over the merged config JSON.
//!
//! ```yaml
//! provider:
//!   id: "broker-a.example.org"
//! server:
//!   bind_addr: "127.0.0.1:8899"
//! storage:
//!   url: "sqlite://frb.db"
//! federation:
//!   rpc_timeout_ms: 20000
//!   token_env: "FRB_FEDERATION_TOKEN"
//!   peers:
//!     broker-b.example.org: "http://10.0.0.2:8899"
//! workers:
//!   open_sleep_ms: 1000
//! clouds:
//!   default: "sim"
//!   entries:
//!     sim:
//!       driver: "simulated"
//!       ready_after_polls: 2
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub provider: ProviderSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub federation: FederationSection,
    #[serde(default)]
    pub workers: WorkerSection,
    pub clouds: CloudsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    /// This broker's identity inside the federation.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8899".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_url")]
    pub url: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
        }
    }
}

fn default_storage_url() -> String {
    "sqlite://frb.db?mode=rwc".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationSection {
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Name of the env var holding the shared federation bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Peer provider id -> base URL.
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
}

fn default_rpc_timeout_ms() -> u64 {
    20_000
}

impl Default for FederationSection {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout_ms(),
            token_env: None,
            peers: BTreeMap::new(),
        }
    }
}

impl FederationSection {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Sleep between passes of each reconciliation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_open_sleep")]
    pub open_sleep_ms: u64,
    #[serde(default = "default_spawning_sleep")]
    pub spawning_sleep_ms: u64,
    #[serde(default = "default_fulfilled_sleep")]
    pub fulfilled_sleep_ms: u64,
    #[serde(default = "default_failed_sleep")]
    pub failed_sleep_ms: u64,
}

fn default_open_sleep() -> u64 {
    1_000
}
fn default_spawning_sleep() -> u64 {
    5_000
}
fn default_fulfilled_sleep() -> u64 {
    10_000
}
fn default_failed_sleep() -> u64 {
    1_000
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            open_sleep_ms: default_open_sleep(),
            spawning_sleep_ms: default_spawning_sleep(),
            fulfilled_sleep_ms: default_fulfilled_sleep(),
            failed_sleep_ms: default_failed_sleep(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudsSection {
    /// Cloud used when a request names none.
    pub default: String,
    pub entries: BTreeMap<String, CloudEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEntry {
    /// Only "simulated" ships with the broker.
    pub driver: String,
    #[serde(default = "default_ready_after_polls")]
    pub ready_after_polls: u32,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

fn default_ready_after_polls() -> u32 {
    1
}

fn default_max_instances() -> u32 {
    100
}

impl BrokerConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: BrokerConfig =
            serde_json::from_value(config_json.clone()).context("invalid broker config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.id.trim().is_empty() {
            bail!("CONFIG_INVALID: provider.id must not be empty");
        }
        if !self.clouds.entries.contains_key(&self.clouds.default) {
            bail!(
                "CONFIG_INVALID: clouds.default '{}' has no entry under clouds.entries",
                self.clouds.default
            );
        }
        if self.federation.peers.contains_key(&self.provider.id) {
            bail!(
                "CONFIG_INVALID: federation.peers lists this broker ('{}') as its own peer",
                self.provider.id
            );
        }
        if self.federation.rpc_timeout_ms == 0 {
            bail!("CONFIG_INVALID: federation.rpc_timeout_ms must be > 0");
        }
        let w = &self.workers;
        for (key, ms) in [
            ("open_sleep_ms", w.open_sleep_ms),
            ("spawning_sleep_ms", w.spawning_sleep_ms),
            ("fulfilled_sleep_ms", w.fulfilled_sleep_ms),
            ("failed_sleep_ms", w.failed_sleep_ms),
        ] {
            if ms == 0 {
                bail!("CONFIG_INVALID: workers.{key} must be > 0");
            }
        }
        Ok(())
    }

    /// Standalone unless at least one peer is configured.
    pub fn mode(&self) -> crate::ConfigMode {
        if self.federation.peers.is_empty() {
            crate::ConfigMode::Standalone
        } else {
            crate::ConfigMode::Federated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Value {
        serde_json::json!({
            "provider": {"id": "a"},
            "clouds": {"default": "sim", "entries": {"sim": {"driver": "simulated"}}}
        })
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let cfg = BrokerConfig::from_json(&minimal()).unwrap();
        assert_eq!(cfg.server.bind_addr, "127.0.0.1:8899");
        assert_eq!(cfg.federation.rpc_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.workers.spawning_sleep_ms, 5_000);
        assert_eq!(cfg.clouds.entries["sim"].ready_after_polls, 1);
        assert_eq!(cfg.mode(), crate::ConfigMode::Standalone);
    }

    #[test]
    fn default_cloud_must_exist() {
        let mut v = minimal();
        v["clouds"]["default"] = "missing".into();
        let err = BrokerConfig::from_json(&v).unwrap_err();
        assert!(err.to_string().contains("clouds.default"), "{err}");
    }

    #[test]
    fn self_peer_is_rejected() {
        let mut v = minimal();
        v["federation"] = serde_json::json!({"peers": {"a": "http://localhost:1"}});
        assert!(BrokerConfig::from_json(&v).is_err());
    }

    #[test]
    fn zero_worker_sleep_is_rejected() {
        for key in [
            "open_sleep_ms",
            "spawning_sleep_ms",
            "fulfilled_sleep_ms",
            "failed_sleep_ms",
        ] {
            let mut v = minimal();
            v["workers"][key] = 0.into();
            let err = BrokerConfig::from_json(&v).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
    }
}
