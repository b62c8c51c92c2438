//! Tests for the `replay` command.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const REPORTS: &str = r#"[
    { "records": [
        { "cluster": "genPowerCfg", "attribute": "0x0201", "value": { "type": "uint16", "value": 30 } },
        { "cluster": "genBasic", "attribute": "0x7fff", "value": { "type": "uint8", "value": 1 } }
    ] },
    { "records": [
        { "cluster": "genPowerCfg", "attribute": "0x0201", "value": { "type": "uint16", "value": 30 } }
    ] },
    { "endpoint": 2, "records": [
        { "cluster": "msTemperatureMeasurement", "attribute": "0x0000", "value": { "type": "int16", "value": 2345 } }
    ] }
]"#;

fn reports_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(REPORTS.as_bytes()).unwrap();
    file
}

fn replay(file: &NamedTempFile) -> Command {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.env_remove("MESHGATE_SCHEMA_PATH")
        .arg("replay")
        .arg(file.path())
        .arg("--device")
        .arg("0x00124b0001")
        .arg("--model")
        .arg("EFEKTA_eFlora_Pro");
    cmd
}

/// Test that replayed reports become state-change events, once per change.
#[test]
fn test_replay_emits_changes_once() {
    let file = reports_file();
    let output = replay(&file).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("\"type\":\"DeviceJoined\""));
    assert_eq!(
        stdout
            .matches("\"field\":\"report_delay\",\"value\":30,\"source\":\"report\"")
            .count(),
        1
    );
    assert!(stdout.contains("\"field\":\"temperature\",\"value\":23.45"));
    assert!(!stdout.contains("0x7fff"));
}

/// Test that --set dispatches after the reports and updates state.
#[test]
fn test_replay_with_set() {
    let file = reports_file();
    replay(&file)
        .arg("--set")
        .arg("report_delay=45")
        .arg("--set")
        .arg("invert=ON")
        .arg("--show-state")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "\"field\":\"report_delay\",\"value\":45,\"source\":\"command\"",
        ))
        .stdout(predicate::str::contains("\"type\":\"CommandCompleted\""))
        .stdout(predicate::str::contains("\"invert\": 1"));
}

/// Test that every change is printed even past the event capacity.
#[test]
fn test_replay_wide_report_past_capacity() {
    let mut file = NamedTempFile::new().unwrap();
    let records: Vec<String> = ["0x0499", "0x0500", "0x0501", "0x0502", "0x0503", "0xF004", "0xF005"]
        .iter()
        .map(|attribute| {
            format!(
                r#"{{ "cluster": "genBasic", "attribute": "{}", "value": {{ "type": "uint8", "value": 1 }} }}"#,
                attribute
            )
        })
        .collect();
    write!(file, r#"[{{ "records": [{}] }}]"#, records.join(",")).unwrap();

    let output = replay(&file)
        .env("MESHGATE_EVENT_CAPACITY", "2")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.matches("\"type\":\"StateChanged\"").count(), 7);
}

/// Test that --factory-reset clears the replayed state.
#[test]
fn test_replay_factory_reset() {
    let file = reports_file();
    replay(&file)
        .arg("--factory-reset")
        .arg("--show-state")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"field\":\"factory_reset\",\"success\":true"))
        .stdout(predicate::str::contains("\"fields\": {}"));
}

/// Test that a rejected command fails the run.
#[test]
fn test_replay_rejected_set() {
    let file = reports_file();
    replay(&file)
        .arg("--set")
        .arg("report_delay=500")
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

/// Test that an unknown model is reported.
#[test]
fn test_replay_unknown_model() {
    let file = reports_file();
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.env_remove("MESHGATE_SCHEMA_PATH")
        .arg("replay")
        .arg(file.path())
        .arg("--model")
        .arg("NoSuchModel");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unknown model"));
}
