//! Basic CLI tests for the meshgate command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;

// Include command-specific test modules
mod commands;

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("mesh-sensor gateways"))
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("encode"))
        .stdout(predicate::str::contains("replay"));
}

/// Test that the CLI shows version information.
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("meshgate"));
}

/// Test the verbose flag is accepted as a global flag.
#[test]
fn test_verbose_flag_accepted() {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();
    cmd.env_remove("MESHGATE_SCHEMA_PATH")
        .arg("--verbose")
        .arg("models");

    cmd.assert().success();
}

/// Test that providing no subcommand shows an error.
#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("meshgate").unwrap();

    // Clap's error code for a missing required subcommand
    cmd.assert().failure().code(2);
}
