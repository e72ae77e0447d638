//! Fingerprint extraction from esptool inspection output.
//!
//! `image_info` output is an untrusted, loosely structured text protocol.
//! The scraping lives entirely in this adapter so format drift can only
//! break one place; callers always see a typed [`Fingerprint`] or an error.

use std::fmt;

use crate::error::{EspvError, Result};

/// Length of the base-image fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// A 32-byte validation hash reported by the flashing utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Scan inspection output for a validation hash reported as valid.
///
/// The expected token is a line of the form
/// `Validation hash: <64 hex digits> (valid)`. A missing or invalid-marked
/// hash is `FingerprintUnavailable`; a present hash that does not decode to
/// 32 bytes is `MalformedFingerprint`.
pub fn parse_validation_hash(output: &str) -> Result<Fingerprint> {
    for line in output.lines() {
        let Some(rest) = line.split("Validation hash:").nth(1) else {
            continue;
        };
        if !rest.contains("(valid)") {
            continue;
        }
        let Some(token) = rest.split_whitespace().next() else {
            continue;
        };
        return decode_hash(token);
    }

    Err(EspvError::FingerprintUnavailable {
        detail: "no validation hash marked (valid) in inspection output".to_string(),
    })
}

fn decode_hash(token: &str) -> Result<Fingerprint> {
    let bytes = hex::decode(token)
        .map_err(|e| EspvError::MalformedFingerprint(format!("{token:?}: {e}")))?;
    let bytes: [u8; FINGERPRINT_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
        EspvError::MalformedFingerprint(format!("expected {FINGERPRINT_LEN} bytes, got {}", b.len()))
    })?;
    Ok(Fingerprint(bytes))
}
