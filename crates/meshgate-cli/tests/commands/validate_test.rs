//! Tests for the `validate` command.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn schema_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Test that a valid schema file passes.
#[test]
fn test_validate_ok() {
    let file = schema_file(
        r#"{ "models": [{
            "model": "test_sensor",
            "fields": [
                { "field": "level", "cluster": "genBasic", "attribute": "0x0502",
                  "wire_type": "uint16", "access": "read_write",
                  "bounds": { "min": 0, "max": 99 } }
            ]
        }]}"#,
    );

    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.arg("validate").arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("OK: 1 model(s)"))
        .stdout(predicate::str::contains("test_sensor"));
}

/// Test that an ambiguous schema is rejected.
#[test]
fn test_validate_duplicate_address() {
    let file = schema_file(
        r#"{ "models": [{
            "model": "broken",
            "fields": [
                { "field": "a", "cluster": "genBasic", "attribute": 1, "wire_type": "uint8" },
                { "field": "b", "cluster": "genBasic", "attribute": 1, "wire_type": "uint8" }
            ]
        }]}"#,
    );

    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.arg("validate").arg(file.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("mapped by both"));
}

/// Test that the path argument is required.
#[test]
fn test_validate_requires_path() {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.arg("validate");

    cmd.assert().failure().code(2);
}
