use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn tether_cmd(cwd: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tether"));
    cmd.current_dir(cwd.path());
    cmd
}

#[test]
fn help_lists_every_agent() {
    let cwd = TempDir::new().expect("cwd");
    tether_cmd(&cwd)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("config-sync"))
        .stdout(contains("monitor"))
        .stdout(contains("register"));
}

#[test]
fn config_sync_requires_exactly_one_mapping_path() {
    let cwd = TempDir::new().expect("cwd");
    tether_cmd(&cwd)
        .arg("config-sync")
        .assert()
        .failure()
        .stderr(contains("Usage"));

    tether_cmd(&cwd)
        .args(["config-sync", "a.yaml", "b.yaml"])
        .assert()
        .failure()
        .stderr(contains("Usage"));
}

#[test]
fn config_sync_fails_on_missing_mapping_file() {
    let cwd = TempDir::new().expect("cwd");
    tether_cmd(&cwd)
        .args(["config-sync", "absent.yaml", "--no-log-file"])
        .assert()
        .failure()
        .stderr(contains("config sync failed"));
}

#[test]
fn config_sync_rejects_mapping_without_server_section() {
    let cwd = TempDir::new().expect("cwd");
    fs::write(cwd.path().join("mapping.yaml"), "config_mapping: {}\n").expect("write mapping");
    tether_cmd(&cwd)
        .args(["config-sync", "mapping.yaml"])
        .assert()
        .failure()
        .stderr(contains("config sync failed"));
    // Logging was initialised before the failure.
    assert!(cwd.path().join("log").is_dir());
}

#[test]
fn register_rejects_malformed_metadata() {
    let cwd = TempDir::new().expect("cwd");
    tether_cmd(&cwd)
        .args(["register", "--metadata", "novalue"])
        .assert()
        .failure()
        .stderr(contains("expected key=value"));
}

#[test]
fn log_file_and_no_log_file_conflict() {
    let cwd = TempDir::new().expect("cwd");
    tether_cmd(&cwd)
        .args(["monitor", "--log-file", "x.log", "--no-log-file"])
        .assert()
        .failure()
        .stderr(contains("cannot be used with"));
}
