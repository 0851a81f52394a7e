use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

fn dibs() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dibs"));
    for (key, _) in std::env::vars() {
        if key.starts_with("DIBS_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn help_lists_both_roles() {
    dibs()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("client"))
        .stdout(predicate::str::contains("host"));
}

#[test]
fn client_help_lists_pipeline_commands() {
    dibs()
        .args(["client", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--build"))
        .stdout(predicate::str::contains("--test"))
        .stdout(predicate::str::contains("--start"))
        .stdout(predicate::str::contains("--bus-url"))
        .stdout(predicate::str::contains("--pull"));
}

#[test]
fn client_fails_without_module_descriptor() {
    let dir = TempDir::new().expect("dir");
    let missing = dir.path().join("go.mod");

    dibs()
        .current_dir(dir.path())
        .args(["client", "--module-file"])
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains(missing.display().to_string()));
}

#[test]
fn client_fails_when_descriptor_declares_no_module() {
    let dir = TempDir::new().expect("dir");
    let descriptor = dir.path().join("go.mod");
    fs::write(&descriptor, "go 1.22\n").expect("write");

    dibs()
        .current_dir(dir.path())
        .args(["client", "--module-file"])
        .arg(&descriptor)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no module declaration"));
}

#[test]
fn malformed_config_file_is_named_in_the_error() {
    let dir = TempDir::new().expect("dir");
    let config = dir.path().join("host.yaml");
    fs::write(&config, "http: [not, a, mapping\n").expect("write");

    dibs()
        .args(["host", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("host.yaml"));
}

#[test]
fn unknown_subcommand_is_rejected() {
    dibs().arg("sync").assert().failure();
}
