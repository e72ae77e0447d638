//! Binary-level tests for the `espv` CLI.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn espv() -> Command {
    let mut cmd = Command::cargo_bin("espv").unwrap();
    // Keep ambient configuration out of the test environment
    for var in ["NO_COLOR", "ESPV_FORMAT", "ESPV_ESPTOOL", "ESPV_PORT", "ESPV_TABLE"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn quick_start_robot_mode_is_json() {
    let output = espv().arg("--robot").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["tool"], "espv");
}

#[test]
fn resolve_prints_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bootloader.bin"), b"boot").unwrap();
    fs::write(dir.path().join("app.bin"), b"app").unwrap();
    let layout = dir.path().join("flasher_args.json");
    fs::write(
        &layout,
        r#"{"flash_files": {"0x1000": "bootloader.bin", "0x10000": "app.bin"}}"#,
    )
    .unwrap();

    espv()
        .arg("resolve")
        .arg(&layout)
        .assert()
        .success()
        .stdout(predicate::str::contains("0x1000"))
        .stdout(predicate::str::contains("0x10000"))
        .stdout(predicate::str::contains("--flash_mode dio"));
}

#[test]
fn resolve_robot_mode_lists_entries_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("app.bin"), b"app").unwrap();
    let layout = dir.path().join("flasher_args.json");
    fs::write(&layout, r#"{"flash_files": {"0x10000": "app.bin"}}"#).unwrap();

    let output = espv()
        .args(["--robot", "resolve"])
        .arg(&layout)
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["entries"][0]["offset"], "0x10000");
    assert_eq!(value["chip"], "esp32");
}

#[test]
fn resolve_with_no_entries_fails_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let layout = dir.path().join("flasher_args.json");
    fs::write(&layout, r#"{"flash_files": {"0x1000": "missing.bin"}}"#).unwrap();

    espv()
        .arg("resolve")
        .arg(&layout)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No valid flash entries"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn patch_info_reads_container_header() {
    let dir = tempfile::tempdir().unwrap();
    let container = dir.path().join("patch.bin");
    let fingerprint = espv::patch::fingerprint::Fingerprint([0xab; 32]);
    espv::patch::write_container(&container, &fingerprint, &mut std::io::Cursor::new(b"xy"))
        .unwrap();

    espv()
        .arg("patch-info")
        .arg(&container)
        .assert()
        .success()
        .stdout(predicate::str::contains("ab".repeat(32)))
        .stdout(predicate::str::contains("2 bytes"));
}

#[test]
fn patch_info_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("bogus.bin");
    fs::write(&bogus, b"not a container").unwrap();

    espv()
        .arg("patch-info")
        .arg(&bogus)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a patch container"));
}

#[test]
fn version_reports_crate_version() {
    espv()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
