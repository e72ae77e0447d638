//! End-to-end provisioning scenarios against the library API.
//!
//! External tools are faked with executable stub scripts, so these tests
//! exercise the real subprocess plumbing without esptool or detools
//! installed. Script-based tests are unix-only.

use std::fs;
use std::path::{Path, PathBuf};

use espv::layout;
use espv::records::{RecordStore, extract_record};

fn write_layout(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("flasher_args.json");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn scenario_a_two_entry_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bootloader.bin"), b"boot").unwrap();
    fs::write(dir.path().join("app.bin"), b"app").unwrap();
    let layout_path = write_layout(
        dir.path(),
        r#"{"flash_files": {"0x1000": "bootloader.bin", "0x10000": "app.bin"}}"#,
    );

    let resolved = layout::load_layout(&layout_path).unwrap();
    let entries: Vec<(u32, PathBuf)> = resolved
        .descriptor
        .entries
        .iter()
        .map(|(o, p)| (*o, p.clone()))
        .collect();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, 0x1000);
    assert_eq!(entries[1].0, 0x10000);
    assert!(entries[0].1.ends_with("bootloader.bin"));
    assert!(resolved.unresolved.is_empty());
}

#[test]
fn resolve_all_missing_is_no_valid_entries() {
    let dir = tempfile::tempdir().unwrap();
    let layout_path = write_layout(
        dir.path(),
        r#"{"flash_files": {"0x1000": "bootloader.bin", "0x10000": "app.bin"}}"#,
    );

    let result = layout::load_layout(&layout_path);
    assert!(matches!(
        result,
        Err(espv::error::EspvError::NoValidEntries)
    ));
}

#[test]
fn resolve_rejects_non_object_document() {
    let dir = tempfile::tempdir().unwrap();
    let layout_path = write_layout(dir.path(), "[1, 2, 3]");

    let result = layout::load_layout(&layout_path);
    assert!(matches!(
        result,
        Err(espv::error::EspvError::InvalidLayout(_))
    ));
}

#[test]
fn scenario_c_telemetry_line_to_table_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new(dir.path().join("records.csv"));

    let line = r#"noise {"type":"mfg","hw_id":"DEV1","result":"pass"} noise"#;
    let record = extract_record(line).unwrap();
    assert_eq!(record.hw_id().as_deref(), Some("DEV1"));
    assert_eq!(record.get("type").as_deref(), Some("mfg"));
    assert_eq!(record.get("result").as_deref(), Some("pass"));

    // DEV1 was not previously present, so the upsert appends.
    assert_eq!(store.upsert(&record).unwrap(), 1);
    // Replaying the same line is idempotent on row count.
    assert_eq!(store.upsert(&record).unwrap(), 1);
}

#[cfg(unix)]
mod with_fake_tools {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;

    use espv::patch::{HEADER_LEN, PATCH_MAGIC, Packager, read_header};
    use espv::session::{DiffClient, EsptoolClient};

    const HASH: &str = "aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899";

    // These tests observe process-wide state (the system temp dir and the
    // working directory), so they must not interleave.
    static FAKE_TOOL_LOCK: Mutex<()> = Mutex::new(());

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fake_esptool(dir: &Path, hash_line: &str) -> EsptoolClient {
        let script = write_script(
            dir,
            "esptool",
            &format!("echo 'esptool.py v4.7'\necho '{hash_line}'"),
        );
        EsptoolClient::new(script)
    }

    /// Fake diff tool: `create_patch --compression <scheme> <base> <target> <out>`.
    fn fake_diff(dir: &Path) -> DiffClient {
        let script = write_script(dir, "detools", "printf 'DELTA' > \"$6\"");
        DiffClient::new(script, "heatshrink")
    }

    fn leftover_deltas() -> Vec<PathBuf> {
        let mut found = Vec::new();
        if let Ok(entries) = fs::read_dir(std::env::temp_dir()) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with("espv-delta-") {
                    found.push(entry.path());
                }
            }
        }
        found
    }

    #[test]
    fn scenario_b_patch_packaging() {
        let _guard = FAKE_TOOL_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.bin");
        let target = dir.path().join("new.bin");
        fs::write(&base, b"old firmware").unwrap();
        fs::write(&target, b"new firmware").unwrap();

        let before = leftover_deltas();

        // Success path: header binds the inspection hash, payload follows.
        let packager = Packager::new(
            fake_esptool(dir.path(), &format!("Validation hash: {HASH} (valid)")),
            fake_diff(dir.path()),
        );
        let out = dir.path().join("out.bin");
        let created = packager
            .create_patch(&base, &target, "esp32c6", Some(&out))
            .unwrap();

        assert_eq!(created.fingerprint.to_string(), HASH);
        let bytes = fs::read(&out).unwrap();
        assert_eq!(
            u32::from_le_bytes(bytes[..4].try_into().unwrap()),
            PATCH_MAGIC
        );
        assert_eq!(&bytes[4..36], hex::decode(HASH).unwrap().as_slice());
        assert_eq!(&bytes[36..64], &[0u8; 28]);
        assert_eq!(&bytes[HEADER_LEN..], b"DELTA");

        let info = read_header(&out).unwrap();
        assert_eq!(info.payload_len, 5);

        // Fingerprint failure: no destination file is ever written.
        let packager = Packager::new(
            fake_esptool(dir.path(), "Image size: 12 bytes"),
            fake_diff(dir.path()),
        );
        let missing_out = dir.path().join("never.bin");
        let result = packager.create_patch(&base, &target, "esp32c6", Some(&missing_out));
        assert!(matches!(
            result,
            Err(espv::error::EspvError::FingerprintUnavailable { .. })
        ));
        assert!(!missing_out.exists());

        // Diff failure: diagnostics captured, destination untouched.
        let failing_diff = DiffClient::new(
            write_script(dir.path(), "baddiff", "echo 'corrupt input' >&2\nexit 9"),
            "heatshrink",
        );
        let packager = Packager::new(
            fake_esptool(dir.path(), &format!("Validation hash: {HASH} (valid)")),
            failing_diff,
        );
        let result = packager.create_patch(&base, &target, "esp32c6", Some(&missing_out));
        match result {
            Err(espv::error::EspvError::DiffFailed { detail }) => {
                assert!(detail.contains("corrupt input"));
            }
            other => panic!("expected DiffFailed, got {other:?}"),
        }
        assert!(!missing_out.exists());

        // The intermediate delta is gone on every exit path.
        assert_eq!(leftover_deltas(), before);
    }

    #[test]
    fn malformed_hash_aborts_before_writing() {
        let _guard = FAKE_TOOL_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.bin");
        let target = dir.path().join("new.bin");
        fs::write(&base, b"a").unwrap();
        fs::write(&target, b"b").unwrap();

        let packager = Packager::new(
            fake_esptool(dir.path(), "Validation hash: aabbcc (valid)"),
            fake_diff(dir.path()),
        );
        let out = dir.path().join("out.bin");
        let result = packager.create_patch(&base, &target, "esp32", Some(&out));
        assert!(matches!(
            result,
            Err(espv::error::EspvError::MalformedFingerprint(_))
        ));
        assert!(!out.exists());
    }

    #[test]
    fn default_destination_name_used_when_unset() {
        let _guard = FAKE_TOOL_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base-1.0.bin");
        let target = dir.path().join("base-1.1.bin");
        fs::write(&base, b"a").unwrap();
        fs::write(&target, b"b").unwrap();

        let packager = Packager::new(
            fake_esptool(dir.path(), &format!("Validation hash: {HASH} (valid)")),
            fake_diff(dir.path()),
        );

        // Run from the temp dir so the default-named output lands there.
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let created = packager.create_patch(&base, &target, "esp32", None);
        std::env::set_current_dir(original).unwrap();

        let created = created.unwrap();
        assert_eq!(
            created.path.file_name().unwrap().to_string_lossy(),
            "patch_base-1.0_to_base-1.1.bin"
        );
    }
}
