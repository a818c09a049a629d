//! Integration tests for the `mergequeue` binary's `config` and `train`
//! commands, run as an external process the way `orchestrate-cli`'s
//! `tests/test_cli_test.rs` drives `orchestrate`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_rules(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn config_validate_prints_parsed_queue_rules() {
    let dir = TempDir::new().unwrap();
    let path = write_rules(
        &dir,
        "rules.yaml",
        r#"
queues:
  default:
    batch_size: 5
    speculative_checks: 2
"#,
    );

    Command::cargo_bin("mergequeue")
        .unwrap()
        .arg("config")
        .arg("validate")
        .arg("--path")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("default"))
        .stdout(predicate::str::contains("batch_size=5"));
}

#[test]
fn config_validate_reports_empty_queue_file() {
    let dir = TempDir::new().unwrap();
    let path = write_rules(&dir, "rules.yaml", "queues: {}\n");

    Command::cargo_bin("mergequeue")
        .unwrap()
        .arg("config")
        .arg("validate")
        .arg("--path")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("defines no queues"));
}

#[test]
fn config_validate_fails_on_missing_file() {
    Command::cargo_bin("mergequeue")
        .unwrap()
        .arg("config")
        .arg("validate")
        .arg("--path")
        .arg("/nonexistent/rules.yaml")
        .assert()
        .failure();
}

#[test]
fn config_validate_fails_on_unknown_extension() {
    let dir = TempDir::new().unwrap();
    let path = write_rules(&dir, "rules.json", "{}");

    Command::cargo_bin("mergequeue")
        .unwrap()
        .arg("config")
        .arg("validate")
        .arg("--path")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no recognized extension"));
}

#[test]
fn add_pull_rejects_a_queue_name_absent_from_the_rules_file() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("trains.db");
    let rules_path = write_rules(
        &dir,
        "rules.yaml",
        r#"
queues:
  default:
    batch_size: 1
"#,
    );

    Command::cargo_bin("mergequeue")
        .unwrap()
        .arg("--db-path")
        .arg(&db_path)
        .arg("--github-token")
        .arg("dummy-token")
        .arg("train")
        .arg("add-pull")
        .arg("--installation-owner-id")
        .arg("1")
        .arg("--repo-id")
        .arg("1")
        .arg("--owner")
        .arg("acme")
        .arg("--repo")
        .arg("widgets")
        .arg("--target-ref")
        .arg("main")
        .arg("--pr-number")
        .arg("42")
        .arg("--queue-rules")
        .arg(&rules_path)
        .arg("--queue-name")
        .arg("nonexistent")
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not defined in"));
}

#[test]
fn train_commands_require_a_github_token() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("trains.db");

    Command::cargo_bin("mergequeue")
        .unwrap()
        .env_remove("GITHUB_TOKEN")
        .arg("--db-path")
        .arg(&db_path)
        .arg("train")
        .arg("remove-pull")
        .arg("--repo-id")
        .arg("1")
        .arg("--owner")
        .arg("acme")
        .arg("--repo")
        .arg("widgets")
        .arg("--target-ref")
        .arg("main")
        .arg("--pr-number")
        .arg("42")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GitHub token is required"));
}

#[test]
fn train_show_reports_when_no_train_is_recorded() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("trains.db");

    Command::cargo_bin("mergequeue")
        .unwrap()
        .arg("--db-path")
        .arg(&db_path)
        .arg("train")
        .arg("show")
        .arg("--repo-id")
        .arg("7")
        .arg("--target-ref")
        .arg("main")
        .assert()
        .success()
        .stdout(predicate::str::contains("No train recorded"));
}
