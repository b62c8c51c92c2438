//! Tests for the `encode` command.

use assert_cmd::Command;
use predicates::prelude::*;

fn encode(field: &str, value: &str) -> Command {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.env_remove("MESHGATE_SCHEMA_PATH")
        .arg("encode")
        .arg("--model")
        .arg("EFEKTA_eFlora_Pro")
        .arg("--field")
        .arg(field)
        .arg(value);
    cmd
}

/// Test encoding an in-range value.
#[test]
fn test_encode_report_delay() {
    encode("report_delay", "45")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cluster\": \"genPowerCfg\""))
        .stdout(predicate::str::contains("\"attribute\": \"0x0201\""))
        .stdout(predicate::str::contains("\"type\": \"uint16\""))
        .stdout(predicate::str::contains("\"value\": 45"));
}

/// Test that a label and its raw integer encode identically.
#[test]
fn test_encode_label_matches_integer() {
    let by_label = encode("fastmode", "ON").output().unwrap();
    let by_number = encode("fastmode", "1").output().unwrap();
    assert!(by_label.status.success());
    assert_eq!(by_label.stdout, by_number.stdout);
}

/// Test that an out-of-range value is rejected.
#[test]
fn test_encode_out_of_range() {
    encode("report_delay", "500")
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

/// Test that sensor fields encode too: access is checked only when sending.
#[test]
fn test_encode_sensor_field() {
    encode("temperature", "20")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\": \"int16\""))
        .stdout(predicate::str::contains("\"value\": 2000"));
}

/// Test that a derived field has no wire form.
#[test]
fn test_encode_derived_field() {
    encode("illuminance_lux", "10")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown field"));
}
