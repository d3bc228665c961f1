//! Config hash stability.
//!
//! GREEN when:
//! - the same input twice yields the same config_hash and canonical JSON
//! - reordering keys within YAML does not change the hash
//! - a changed value changes the hash
//! - an overlay layer overrides only the keys it names

use balsync_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
database:
  url_env: "BALSYNC_DATABASE_URL"
  max_connections: 10
sync:
  poll_interval_secs: 10
  starting_balance: "100.00"
"#;

const BASE_YAML_REORDERED: &str = r#"
sync:
  starting_balance: "100.00"
  poll_interval_secs: 10
database:
  max_connections: 10
  url_env: "BALSYNC_DATABASE_URL"
"#;

const OVERLAY_YAML: &str = r#"
sync:
  poll_interval_secs: 3
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();

    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64, "sha256 hex digest");
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn different_value_changes_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_overrides_only_named_keys() {
    let merged = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(merged.config_json["sync"]["poll_interval_secs"], 3);
    assert_eq!(merged.config_json["sync"]["starting_balance"], "100.00");
    assert_eq!(merged.config_json["database"]["max_connections"], 10);
}
