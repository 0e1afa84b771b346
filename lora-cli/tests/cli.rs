//! End-to-end checks of the lora-bridge binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const POSITION: &str = r#"<event version="2.0" uid="T-1" type="a-h-G" how="h-e" time="2024-01-01T00:00:00.000Z" start="2024-01-01T00:00:00.000Z" stale="2024-01-01T00:10:00.000Z"><point lat="10" lon="20" hae="0" ce="5" le="5"/><detail><contact callsign="TANGO"/></detail></event>"#;

fn bridge() -> Command {
    let mut cmd = Command::cargo_bin("lora-bridge").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    bridge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("send-chat"));
}

#[test]
fn encode_then_inspect() {
    let dir = tempdir().unwrap();
    let xml = dir.path().join("position.xml");
    std::fs::write(&xml, POSITION).unwrap();

    let output = bridge().arg("encode").arg(&xml).output().unwrap();
    assert!(output.status.success());
    let frame = String::from_utf8(output.stdout).unwrap();
    assert!(frame.starts_with("LORA_COTX|"), "{frame}");

    bridge()
        .arg("inspect")
        .arg(frame.trim())
        .assert()
        .success()
        .stdout(predicate::str::contains("Uid:      T-1"))
        .stdout(predicate::str::contains("callsign=\"TANGO\""));
}

#[test]
fn inspect_rejects_garbage() {
    bridge()
        .args(["inspect", "a|b|c"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a bridge frame"));
}

#[test]
fn config_file_selects_compaction() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("lora-bridge.toml");
    std::fs::write(&config, "[codec]\ncompaction = \"plain\"\n").unwrap();
    let xml = dir.path().join("position.xml");
    std::fs::write(&xml, POSITION).unwrap();

    let output = bridge()
        .arg("--config")
        .arg(&config)
        .arg("encode")
        .arg(&xml)
        .output()
        .unwrap();
    let frame = String::from_utf8(output.stdout).unwrap();

    // A plain frame does not decode as binary XML.
    bridge()
        .args(["inspect", frame.trim()])
        .assert()
        .failure();
    bridge()
        .arg("--config")
        .arg(&config)
        .args(["inspect", frame.trim()])
        .assert()
        .success();
}

#[test]
fn history_without_database() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("lora-bridge.toml");
    std::fs::write(
        &config,
        format!("[storage]\ndatabase = {:?}\n", dir.path().join("bridge.db")),
    )
    .unwrap();

    bridge()
        .arg("--config")
        .arg(&config)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No database"));
}
