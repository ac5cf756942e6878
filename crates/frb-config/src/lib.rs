//! Layered YAML configuration for the broker.
//!
//! Documents are merged in order (later layers override earlier ones),
//! converted to JSON, checked for literal secrets and hashed over their
//! canonical form. The typed view lives in [`broker`]; secrets are resolved
//! from the environment by [`secrets`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

pub mod broker;
pub mod secrets;

pub use broker::{BrokerConfig, CloudEntry, CloudsSection, FederationSection, WorkerSection};
pub use secrets::{resolve_federation_secrets, FederationSecrets};

/// Leaf string values starting with any of these abort loading. Config
/// stores env var NAMES, never values.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
    "eyJhbGci", // JWT header
];

// ---------------------------------------------------------------------------
// Consumed-key registry
// ---------------------------------------------------------------------------

/// How the broker runs. A standalone broker never reads the federation
/// section, so keys there are reported as unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    Standalone,
    Federated,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Standalone => "STANDALONE",
            ConfigMode::Federated => "FEDERATED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    pub consumed_prefixes: Vec<String>,
    /// Sorted leaf pointers not covered by any consumed prefix.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON-pointer prefixes actually read by `BrokerConfig` in each mode.
pub fn consumed_pointers_for_mode(mode: ConfigMode) -> &'static [&'static str] {
    match mode {
        ConfigMode::Standalone => &[
            "/provider/id",
            "/server/bind_addr",
            "/storage/url",
            "/workers",
            "/clouds",
        ],
        ConfigMode::Federated => &[
            "/provider/id",
            "/server/bind_addr",
            "/storage/url",
            "/workers",
            "/clouds",
            "/federation/rpc_timeout_ms",
            "/federation/peers",
            "/federation/token_env",
        ],
    }
}

/// Report leaves of `config_json` that nothing reads in `mode`.
/// `Fail` turns a non-empty report into an error.
pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = consumed_pointers_for_mode(mode)
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !consumed_prefixes.iter().any(|p| is_prefix_pointer(p, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} unused leaf key(s): {:?}",
            report.mode,
            report.unused_leaf_pointers.len(),
            report
                .unused_leaf_pointers
                .iter()
                .take(12)
                .collect::<Vec<_>>()
        );
    }

    Ok(report)
}

fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                collect_leaf_pointers(child, &format!("{prefix}/{token}"), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_leaf_pointers(child, &format!("{prefix}/{i}"), out);
            }
        }
        _ if prefix.is_empty() => out.push("/".to_string()),
        _ => out.push(prefix.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Deserialize and validate the typed broker view.
    pub fn broker(&self) -> Result<BrokerConfig> {
        BrokerConfig::from_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for (i, raw) in yaml_docs.iter().enumerate() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {i}"))?;
        // An empty layer parses as null; treat it as "no overrides".
        if doc.is_null() {
            continue;
        }
        let json = serde_json::to_value(doc).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, json);
    }

    reject_secret_literals(&merged)?;

    // serde_json::Map is a BTreeMap here, so key order is canonical.
    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));

    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut b), Value::Object(o)) => {
            for (k, ov) in o {
                let bv = b.remove(&k).unwrap_or(Value::Null);
                b.insert(k, deep_merge(bv, ov));
            }
            Value::Object(b)
        }
        (_, other) => other,
    }
}

fn reject_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);
    for ptr in leaves {
        let Some(s) = v.pointer(&ptr).and_then(Value::as_str) else {
            continue;
        };
        if looks_like_secret(s) {
            bail!("CONFIG_SECRET_DETECTED leaf={ptr} value=REDACTED");
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pointer_respects_token_boundary() {
        assert!(is_prefix_pointer("/workers", "/workers/open_sleep_ms"));
        assert!(is_prefix_pointer("/workers", "/workers"));
        assert!(!is_prefix_pointer("/workers", "/workersx/open_sleep_ms"));
        assert!(is_prefix_pointer("/", "/anything"));
    }

    #[test]
    fn leaf_pointers_escape_slashes() {
        let v = serde_json::json!({"federation": {"peers": {"a/b": "http://x"}}});
        let mut out = Vec::new();
        collect_leaf_pointers(&v, "", &mut out);
        assert_eq!(out, vec!["/federation/peers/a~1b".to_string()]);
    }

    #[test]
    fn overlay_replaces_scalars_and_merges_maps() {
        let base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": [1, 2]});
        let over = serde_json::json!({"a": {"y": 3}, "b": [9]});
        let m = deep_merge(base, over);
        assert_eq!(m, serde_json::json!({"a": {"x": 1, "y": 3}, "b": [9]}));
    }

    #[test]
    fn short_strings_are_never_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("sk-live-000000000"));
    }
}
