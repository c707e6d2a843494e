//! Config load/save behaviour against a scratch home directory.

use std::fs;
use std::time::Duration;

use assert_fs::prelude::*;
use fim_core::{
    config::{self, Config, LogFormat},
    ConfigError, HostId,
};
use predicates::prelude::predicate;
use rstest::rstest;

fn write_config(home: &assert_fs::TempDir, yaml: &str) {
    home.child(".fim").create_dir_all().expect("mkdir");
    home.child(".fim/fim.yaml").write_str(yaml).expect("write");
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn missing_file_yields_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded, Config::default());
    assert_eq!(loaded.monitor().interval, Duration::from_secs(60));
    assert_eq!(loaded.host_ip, HostId::from("127.0.0.1"));
}

#[test]
fn partial_file_keeps_defaults_for_missing_keys() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "check_interval: 5\n");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.check_interval, 5);
    assert_eq!(loaded.host_ip, HostId::default());
    assert_eq!(loaded.log_format, LogFormat::Text);
}

#[test]
fn full_file_is_parsed() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(
        &home,
        "host_ip: 10.2.3.4\ncheck_interval: 30\ndatabase:\n  path: /srv/fim/files.db\nlog_format: json\n",
    );

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.host_ip, HostId::from("10.2.3.4"));
    assert_eq!(
        loaded.database_path(home.path()),
        std::path::PathBuf::from("/srv/fim/files.db")
    );
    assert_eq!(loaded.log_format, LogFormat::Json);
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "check_interval: [unclosed\n");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("fim.yaml"));
}

#[rstest]
#[case::zero_interval("check_interval: 0\n")]
#[case::blank_host("host_ip: \"  \"\n")]
fn unusable_values_are_rejected(#[case] yaml: &str) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, yaml);

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Save
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_returns_same_config() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let config = Config {
        host_ip: HostId::from("172.16.0.1"),
        check_interval: 12,
        ..Config::default()
    };

    let path = config::save_at(home.path(), &config).expect("save");
    home.child(".fim/fim.yaml").assert(predicate::path::exists());
    home.child(".fim/fim.yaml.tmp")
        .assert(predicate::path::missing());

    let loaded = config::load_from(&path).expect("load");
    assert_eq!(loaded, config);
}

#[cfg(unix)]
#[test]
fn saved_config_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = config::save_at(home.path(), &Config::default()).expect("save");
    let mode = fs::metadata(path).expect("meta").permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn save_rejects_invalid_config() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let config = Config {
        check_interval: 0,
        ..Config::default()
    };
    assert!(config::save_at(home.path(), &config).is_err());
    home.child(".fim/fim.yaml").assert(predicate::path::missing());
}
