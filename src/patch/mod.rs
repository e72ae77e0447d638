//! OTA patch container construction and inspection.
//!
//! A patch container binds a compressed delta to the fingerprint of the
//! firmware it applies on top of. Layout (little-endian):
//!
//! | bytes  | content                                  |
//! |--------|------------------------------------------|
//! | 0-3    | magic `0xfccdde10`                       |
//! | 4-35   | base-image validation hash (32 bytes)    |
//! | 36-63  | reserved, zero                           |
//! | 64-    | compressed delta payload                 |
//!
//! The header is exactly 64 bytes regardless of payload size. Containers are
//! written in one shot and never mutated afterwards.

pub mod fingerprint;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{EspvError, Result};
use crate::session::tools::{DiffClient, EsptoolClient};
use fingerprint::{FINGERPRINT_LEN, Fingerprint};

/// Magic constant identifying the container format.
pub const PATCH_MAGIC: u32 = 0xfccd_de10;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 64;

const RESERVED_LEN: usize = HEADER_LEN - 4 - FINGERPRINT_LEN;

/// Parsed container header plus payload size.
#[derive(Debug, Clone, Copy)]
pub struct ContainerInfo {
    pub fingerprint: Fingerprint,
    pub payload_len: u64,
}

/// Result of a successful patch-generation request.
#[derive(Debug)]
pub struct CreatedPatch {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub payload_len: u64,
}

/// Write a container to `dest`: header, then a byte-for-byte payload copy.
///
/// Returns the payload length. The destination is created (truncated) here;
/// callers must treat a partially written file as invalid on error.
pub fn write_container(
    dest: &Path,
    fingerprint: &Fingerprint,
    payload: &mut dyn Read,
) -> Result<u64> {
    let mut out = File::create(dest).map_err(|e| EspvError::from_io(e, dest))?;

    out.write_all(&PATCH_MAGIC.to_le_bytes())?;
    out.write_all(fingerprint.as_bytes())?;
    out.write_all(&[0u8; RESERVED_LEN])?;
    let payload_len = io::copy(payload, &mut out)?;
    out.flush()?;

    debug!(dest = %dest.display(), payload_len, "Wrote patch container");
    Ok(payload_len)
}

/// Read and validate a container header.
pub fn read_header(path: &Path) -> Result<ContainerInfo> {
    let mut file = File::open(path).map_err(|e| EspvError::from_io(e, path))?;

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header).map_err(|_| {
        EspvError::BadContainer(format!(
            "{} is shorter than the {HEADER_LEN}-byte header",
            path.display()
        ))
    })?;

    let magic = u32::from_le_bytes(header[..4].try_into().unwrap_or_default());
    if magic != PATCH_MAGIC {
        return Err(EspvError::BadContainer(format!(
            "bad magic {magic:#010x}, expected {PATCH_MAGIC:#010x}"
        )));
    }

    let mut digest = [0u8; FINGERPRINT_LEN];
    digest.copy_from_slice(&header[4..4 + FINGERPRINT_LEN]);

    let total = file.metadata()?.len();
    Ok(ContainerInfo {
        fingerprint: Fingerprint(digest),
        payload_len: total.saturating_sub(HEADER_LEN as u64),
    })
}

/// Default destination name: `patch_<base-stem>_to_<target-stem>.bin`.
pub fn default_dest_name(base: &Path, target: &Path) -> String {
    format!("patch_{}_to_{}.bin", stem_of(base), stem_of(target))
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned())
}

/// Packages a base→target firmware delta into a patch container.
pub struct Packager {
    esptool: EsptoolClient,
    diff: DiffClient,
}

impl Packager {
    pub fn new(esptool: EsptoolClient, diff: DiffClient) -> Self {
        Self { esptool, diff }
    }

    /// Create a patch container for upgrading `base` to `target`.
    ///
    /// The fingerprint is always computed from the *base* image with the
    /// same chip used for the diff. The intermediate delta lives in a
    /// private temp file that is removed on every exit path. No destination
    /// file exists until the fingerprint step has succeeded.
    pub fn create_patch(
        &self,
        base: &Path,
        target: &Path,
        chip: &str,
        dest: Option<&Path>,
    ) -> Result<CreatedPatch> {
        let fingerprint = self.esptool.image_fingerprint(base, chip)?;
        debug!(%fingerprint, base = %base.display(), "Base image fingerprint");

        let delta = tempfile::Builder::new()
            .prefix("espv-delta-")
            .suffix(".bin")
            .tempfile()?;
        self.diff.create_delta(base, target, delta.path())?;

        let dest = dest.map_or_else(|| PathBuf::from(default_dest_name(base, target)), Path::to_path_buf);
        let mut payload = File::open(delta.path())?;
        let payload_len = write_container(&dest, &fingerprint, &mut payload)?;

        info!(
            dest = %dest.display(),
            payload_len,
            "Patch container created"
        );
        Ok(CreatedPatch {
            path: dest,
            fingerprint,
            payload_len,
        })
    }
}
