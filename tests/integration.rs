//! Integration tests for the panelctl subcommands.
//!
//! The configured server address points at a closed port, so only paths that
//! stop before the network (or fail on it) are exercised here.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

struct TestEnv {
    temp_dir: TempDir,
    config_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[api]
base_url = "http://127.0.0.1:9"
timeout_secs = 2

[[pages]]
key = "users"
title = "USERS"
path = "/admin/users"

[[pages]]
key = "contacts"
title = "CONTACTS"
path = "/admin/contacts"
"#,
        )
        .unwrap();
        Self {
            temp_dir,
            config_path,
        }
    }

    fn cmd(&self) -> AssertCommand {
        let mut cmd = panelctl_cmd();
        cmd.arg("--config").arg(&self.config_path);
        cmd
    }

    fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }
}

fn panelctl_cmd() -> AssertCommand {
    let mut cmd = AssertCommand::cargo_bin("panelctl").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

// =============================================================================
// Command line
// =============================================================================

#[test]
fn test_help_lists_subcommands() {
    panelctl_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("delete"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("update"));
}

#[test]
fn test_missing_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    panelctl_cmd()
        .args(["--config"])
        .arg(temp_dir.path().join("nope.toml"))
        .args(["delete", "--page", "users", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn test_unknown_page_is_rejected() {
    let env = TestEnv::new();
    env.cmd()
        .args(["delete", "--page", "orders", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown page `orders`"))
        .stderr(predicate::str::contains("users, contacts"));
}

#[test]
fn test_update_rejects_malformed_assignment() {
    let env = TestEnv::new();
    env.cmd()
        .args(["update", "--page", "users", "3", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected FIELD=VALUE"));
}

// =============================================================================
// Bulk delete
// =============================================================================

#[test]
fn test_delete_without_ids_warns() {
    let env = TestEnv::new();
    env.cmd()
        .args(["delete", "--page", "users"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to delete."))
        .stderr(predicate::str::contains("Select at least one item to delete."));
}

#[test]
fn test_delete_without_answer_is_cancelled() {
    let env = TestEnv::new();
    env.cmd()
        .args(["delete", "--page", "users", "3", "7"])
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled."))
        .stderr(predicate::str::contains(
            "Delete 2 selected items? This cannot be undone.",
        ));
}

#[test]
fn test_delete_declined_is_cancelled() {
    let env = TestEnv::new();
    env.cmd()
        .args(["delete", "--page", "users", "3"])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled."))
        .stderr(predicate::str::contains("Delete 1 selected item?"));
}

#[test]
fn test_confirmed_delete_reports_unreachable_server() {
    let env = TestEnv::new();
    env.cmd()
        .args(["delete", "--page", "users", "--yes", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("delete failed"))
        .stderr(predicate::str::contains("error:"));
}

// =============================================================================
// Import
// =============================================================================

#[test]
fn test_import_empty_file_fails() {
    let env = TestEnv::new();
    let path = env.write_file("leads.csv", "");
    env.cmd()
        .arg("import")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("leads.csv is empty"));
}

#[test]
fn test_import_unsupported_type_fails() {
    let env = TestEnv::new();
    let path = env.write_file("leads.json", "[]");
    env.cmd()
        .arg("import")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported file type"))
        .stderr(predicate::str::contains("csv"));
}

#[test]
fn test_import_missing_file_fails() {
    let env = TestEnv::new();
    env.cmd()
        .arg("import")
        .arg(env.temp_dir.path().join("absent.csv"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}
