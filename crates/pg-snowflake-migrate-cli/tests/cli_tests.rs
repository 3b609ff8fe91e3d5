//! CLI integration tests for pg-snowflake-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that need no live database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the pg-snowflake-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("pg-snowflake-migrate").unwrap()
}

/// A complete configuration. Nothing listens on port 1 and the key file
/// does not exist, so any command that connects fails fast.
fn valid_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
source:
  host: 127.0.0.1
  port: 1
  database: northwind
  user: postgres
  password: secret
target:
  account: xy12345.us-east-1
  user: loader
  role: SYSADMIN
  warehouse: COMPUTE_WH
  private_key_file: /nonexistent/rsa_key.p8
  public_key_fingerprint: "SHA256:2xADWF7tm8ismsqjvHiAh5ox8txuAXxDzXkOQc8iQxA="
  database_suffix: dev
migration:
  load_mode: staged_swap
"#
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("migrate-table"))
        .stdout(predicate::str::contains("publish-views"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("plan"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--concurrency"))
        .stdout(predicate::str::contains("--continue-on-error"))
        .stdout(predicate::str::contains("--skip-views"))
        .stdout(predicate::str::contains("--verify"));
}

#[test]
fn test_verify_subcommand_help() {
    cmd()
        .args(["verify", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tolerance"))
        .stdout(predicate::str::contains("--allow-mismatch"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pg-snowflake-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_and_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_target_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: northwind").unwrap();
    writeln!(file, "  user: postgres").unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  account: xy12345").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("target.user is required"));
}

#[test]
fn test_unknown_log_format_exits_with_code_1() {
    let file = valid_config();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--log-format",
            "xml",
            "plan",
        ])
        .assert()
        .code(1);
}

#[test]
fn test_unreachable_databases_exit_with_code_3() {
    let file = valid_config();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("UNHEALTHY"));
}

// =============================================================================
// Plan (no connections)
// =============================================================================

#[test]
fn test_plan_prints_waves_and_ddl() {
    let file = valid_config();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Target: NORTHWIND_DEV.PUBLIC (mode: staged_swap)",
        ))
        .stdout(predicate::str::contains("Wave 3: order_details"))
        .stdout(predicate::str::contains(
            "CREATE DATABASE IF NOT EXISTS \"NORTHWIND_DEV\";",
        ))
        .stdout(predicate::str::contains(
            "ALTER TABLE \"ORDERS\" SWAP WITH \"ORDERS__STAGING\";",
        ))
        .stdout(predicate::str::contains(
            "CREATE OR REPLACE VIEW \"ORDER_DETAILS_VIEW\"",
        ));
}

#[test]
fn test_dry_run_prints_plan_as_json() {
    let file = valid_config();

    let output = cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "run",
            "--dry-run",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let plan: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(plan["database"], "NORTHWIND_DEV");
    assert_eq!(plan["load_mode"], "staged_swap");
    assert_eq!(plan["waves"].as_array().unwrap().len(), 3);
}
