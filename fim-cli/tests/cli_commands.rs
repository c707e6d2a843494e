use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn fim(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fim").expect("fim binary");
    cmd.env("HOME", home.path()).env("USERPROFILE", home.path());
    cmd
}

#[test]
fn init_writes_config_with_overrides() {
    let home = TempDir::new().expect("home");

    fim(&home)
        .args(["init", "--host", "10.0.0.9", "--interval", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fim.yaml"));

    let written = std::fs::read_to_string(home.path().join(".fim/fim.yaml")).expect("config");
    assert!(written.contains("10.0.0.9"));
    assert!(written.contains("check_interval: 5"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let home = TempDir::new().expect("home");
    fim(&home).arg("init").assert().success();

    fim(&home)
        .args(["init", "--interval", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    fim(&home)
        .args(["init", "--interval", "9", "--force"])
        .assert()
        .success();
}

#[test]
fn init_rejects_zero_interval() {
    let home = TempDir::new().expect("home");
    fim(&home)
        .args(["init", "--interval", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("check_interval"));
}

#[test]
fn list_without_daemon_points_at_daemon_start() {
    let home = TempDir::new().expect("home");
    fim(&home)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("fim daemon start"));
}

#[test]
fn daemon_status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    fim(&home)
        .args(["daemon", "status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""running": false"#));

    fim(&home)
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}
