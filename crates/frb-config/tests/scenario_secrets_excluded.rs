//! Literal secrets are refused at load time; env var names are fine.

use frb_config::{load_layered_yaml_from_strings, resolve_federation_secrets};

const YAML_WITH_TOKEN_LITERAL: &str = r#"
provider:
  id: "broker-a"
federation:
  token_env: "eyJhbGciOiJIUzI1NiJ9.payload.sig"
clouds:
  default: "sim"
  entries:
    sim:
      driver: "simulated"
"#;

const YAML_WITH_ENV_NAME: &str = r#"
provider:
  id: "broker-a"
federation:
  token_env: "FRB_TEST_TOKEN_THAT_IS_NEVER_SET"
clouds:
  default: "sim"
  entries:
    sim:
      driver: "simulated"
"#;

#[test]
fn literal_token_is_rejected_without_echoing_it() {
    let err = load_layered_yaml_from_strings(&[YAML_WITH_TOKEN_LITERAL]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_SECRET_DETECTED"), "{msg}");
    assert!(msg.contains("/federation/token_env"), "{msg}");
    assert!(!msg.contains("payload.sig"), "secret value leaked: {msg}");
}

#[test]
fn env_name_loads_but_unset_variable_fails_resolution() {
    let loaded = load_layered_yaml_from_strings(&[YAML_WITH_ENV_NAME]).unwrap();
    let cfg = loaded.broker().unwrap();
    let err = resolve_federation_secrets(&cfg).unwrap_err();
    assert!(
        err.to_string().contains("FRB_TEST_TOKEN_THAT_IS_NEVER_SET"),
        "error must name the variable: {err}"
    );
}
