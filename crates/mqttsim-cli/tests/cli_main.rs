//! Basic CLI tests for the mqtt-sim binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn mqtt_sim(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mqtt-sim").unwrap();
    cmd.current_dir(dir.path())
        .env("DB_DATABASE", dir.path().join("devices.redb"))
        .env("DEVICE_TEMPLATES_PATH", dir.path().join("templates.json"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("mqtt-sim").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("kinds"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("import"));
}

#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("mqtt-sim").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_kinds_lists_all_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let output = mqtt_sim(&dir).arg("kinds").assert().success().get_output().clone();

    let kinds: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<_> = kinds
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["light", "switch", "sensor.temp", "cover", "fan"]);
}

#[test]
fn test_export_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let output = mqtt_sim(&dir).arg("export").assert().success().get_output().clone();

    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(snapshot["version"], 1);
    assert_eq!(snapshot["namespace"], "sim");
    assert_eq!(snapshot["count"], 0);
}

#[test]
fn test_export_to_file_uses_namespace_from_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[mqtt]\nnamespace = \"lab\"\n",
    )
    .unwrap();

    mqtt_sim(&dir)
        .args(["export", "--output", "snapshot.json"])
        .assert()
        .success();

    let raw = std::fs::read_to_string(dir.path().join("snapshot.json")).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["namespace"], "lab");
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    mqtt_sim(&dir)
        .env("MQTT_QOS", "7")
        .arg("export")
        .assert()
        .failure()
        .stderr(predicate::str::contains("qos"));
}

#[test]
fn test_import_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    mqtt_sim(&dir)
        .args(["import", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.json"));
}
