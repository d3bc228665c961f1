//! Scenario: config commands run without a database.
//!
//! # Invariants under test
//!
//! - `config-hash` prints a stable hash for the shipped base layer.
//! - `config-check --strict` fails on keys nothing reads; without `--strict`
//!   it reports them and succeeds.
//! - A credential literal in any layer is refused.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

fn base_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("config")
        .join("balsync.yaml")
}

fn layer(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(contents.as_bytes()).expect("write layer");
    f
}

#[test]
fn config_hash_is_stable_across_runs() -> anyhow::Result<()> {
    let base = base_config();

    let first = Command::cargo_bin("balsync")?.arg("config-hash").arg(&base).output()?;
    let second = Command::cargo_bin("balsync")?.arg("config-hash").arg(&base).output()?;
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);

    let out = String::from_utf8(first.stdout)?;
    assert!(out.starts_with("config_hash="));
    assert!(out.contains("\"poll_interval_secs\":10"));
    Ok(())
}

#[test]
fn config_check_strict_rejects_unused_keys() -> anyhow::Result<()> {
    let extra = layer("sync:\n  poll_interval_secs: 5\n  reset_on_join: true\n");

    Command::cargo_bin("balsync")?
        .arg("config-check")
        .arg(base_config())
        .arg(extra.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("poll_interval_secs=5"))
        .stderr(predicate::str::contains("unused_key=/sync/reset_on_join"));

    Command::cargo_bin("balsync")?
        .arg("config-check")
        .arg("--strict")
        .arg(base_config())
        .arg(extra.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("/sync/reset_on_join"));
    Ok(())
}

#[test]
fn config_with_secret_literal_is_refused() -> anyhow::Result<()> {
    let secret = layer("database:\n  url_env: \"postgres://admin:hunter2@db/balances\"\n");

    Command::cargo_bin("balsync")?
        .arg("config-hash")
        .arg(base_config())
        .arg(secret.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
    Ok(())
}

#[test]
fn config_check_rejects_invalid_values() -> anyhow::Result<()> {
    let bad = layer("sync:\n  starting_balance: \"10.005\"\n");

    Command::cargo_bin("balsync")?
        .arg("config-check")
        .arg(base_config())
        .arg(bad.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_INVALID"));
    Ok(())
}
