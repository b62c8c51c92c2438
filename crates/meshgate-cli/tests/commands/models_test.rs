//! Tests for the `models` command.

use assert_cmd::Command;
use predicates::prelude::*;

/// Test that the built-in model is listed with its controls.
#[test]
fn test_models_lists_builtin() {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.env_remove("MESHGATE_SCHEMA_PATH").arg("models");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("EFEKTA_eFlora_Pro"))
        .stdout(predicate::str::contains("report_delay"))
        .stdout(predicate::str::contains("genPowerCfg/0x0201"))
        .stdout(predicate::str::contains("[1, 360]"))
        .stdout(predicate::str::contains("illuminance_lux"))
        .stdout(predicate::str::contains("battery_low"));
}

/// Test that a missing schema file is reported.
#[test]
fn test_models_missing_schema_file() {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.arg("models").arg("--schema").arg("/nonexistent/schema.json");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load schema file"));
}
