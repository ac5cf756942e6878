use frb_config::{load_layered_yaml_from_strings, report_unused_keys, ConfigMode, UnusedKeyPolicy};

const YAML: &str = r#"
provider:
  id: "broker-a"
federation:
  rpc_timeout_ms: 500
  peers:
    broker-b: "http://127.0.0.1:9000"
workers:
  open_sleep_ms: 10
clouds:
  default: "sim"
  entries:
    sim:
      driver: "simulated"
legacy:
  xmpp_jid: "ras.example.org"
"#;

#[test]
fn warn_mode_reports_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report =
        report_unused_keys(ConfigMode::Federated, &loaded.config_json, UnusedKeyPolicy::Warn)
            .unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/xmpp_jid".to_string()]);
}

#[test]
fn standalone_mode_flags_federation_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report =
        report_unused_keys(ConfigMode::Standalone, &loaded.config_json, UnusedKeyPolicy::Warn)
            .unwrap();
    assert!(report
        .unused_leaf_pointers
        .contains(&"/federation/peers/broker-b".to_string()));
    assert!(report
        .unused_leaf_pointers
        .contains(&"/federation/rpc_timeout_ms".to_string()));
    // Sorted output.
    let mut sorted = report.unused_leaf_pointers.clone();
    sorted.sort();
    assert_eq!(sorted, report.unused_leaf_pointers);
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(ConfigMode::Federated, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn typed_config_picks_mode_from_peers() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let cfg = loaded.broker().unwrap();
    assert_eq!(cfg.mode(), ConfigMode::Federated);
    assert_eq!(cfg.federation.rpc_timeout_ms, 500);
    assert_eq!(cfg.workers.open_sleep_ms, 10);
    assert_eq!(cfg.workers.failed_sleep_ms, 1_000);
}
