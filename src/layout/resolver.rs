//! Resolution of a layout document into a canonical flash descriptor.
//!
//! Offsets are validated, relative paths are resolved through an ordered list
//! of candidate locations, and everything that cannot be located is reported
//! individually instead of aborting the load. The candidate search is a pure
//! function of the involved directories plus an injected existence predicate,
//! so the ordering is testable without touching the filesystem.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace, warn};

use super::schema::{ExtraEsptoolArgs, LayoutDocument};
use crate::error::{EspvError, Result};

/// Conventional build-output directory probed as a fallback location.
pub const BUILD_DIR: &str = "build";

/// Canonical, conflict-free mapping of flash offsets to verified image paths.
///
/// Offsets are unique by construction and iterate in ascending order, which
/// is also the order the flashing command line is assembled in. A descriptor
/// is rebuilt wholesale on every layout load, never mutated in place.
#[derive(Debug, Clone)]
pub struct FlashDescriptor {
    /// Offset (flash address) to resolved absolute file path.
    pub entries: BTreeMap<u32, PathBuf>,
    /// Flashing-mode arguments (`--flash_mode dio ...`).
    pub write_flash_args: Vec<String>,
    /// Auxiliary esptool options (pre/post reset behavior, chip).
    pub extra: ExtraEsptoolArgs,
}

impl FlashDescriptor {
    /// Format an offset the way it appears on the esptool command line.
    pub fn format_offset(offset: u32) -> String {
        format!("{offset:#x}")
    }
}

/// A layout entry that could not be located on the filesystem.
#[derive(Debug, Clone)]
pub struct UnresolvedEntry {
    /// Owning offset, or `section (offset)` for the modular shape.
    pub context: String,
    /// The path exactly as it appeared in the document.
    pub original: String,
    /// Every location that was probed, in search order.
    pub searched: Vec<PathBuf>,
}

/// Successful resolution: the descriptor plus per-entry failures.
#[derive(Debug)]
pub struct ResolvedLayout {
    pub descriptor: FlashDescriptor,
    pub unresolved: Vec<UnresolvedEntry>,
}

/// Load and resolve a layout document from disk.
pub fn load_layout(path: &Path) -> Result<ResolvedLayout> {
    let text = std::fs::read_to_string(path).map_err(|e| EspvError::from_io(e, path))?;
    let document: LayoutDocument =
        serde_json::from_str(&text).map_err(|e| EspvError::InvalidLayout(e.to_string()))?;

    let document_dir = path.parent().unwrap_or_else(|| Path::new("."));
    resolve(&document, document_dir)
}

/// Resolve a parsed document against the real filesystem.
pub fn resolve(document: &LayoutDocument, document_dir: &Path) -> Result<ResolvedLayout> {
    let work_dir = std::env::current_dir()?;
    resolve_with(
        document,
        document_dir,
        &work_dir,
        Path::new(BUILD_DIR),
        &|p| p.exists(),
    )
}

/// Resolve with explicit directories and an injected existence predicate.
///
/// Candidate entries come from the `flash_files` map first, then the named
/// sections in fixed order; a later entry with the same offset replaces the
/// earlier one. Entries whose offset key does not match `0x` + hex digits are
/// skipped silently — partially-specified documents are tolerated, not
/// rejected.
pub fn resolve_with(
    document: &LayoutDocument,
    document_dir: &Path,
    work_dir: &Path,
    build_dir: &Path,
    exists: &dyn Fn(&Path) -> bool,
) -> Result<ResolvedLayout> {
    let mut entries = BTreeMap::new();
    let mut unresolved = Vec::new();

    let mut consider = |offset_key: &str, raw: &str, context: String| {
        let Some(offset) = parse_offset(offset_key) else {
            trace!(offset = offset_key, "Skipping entry with non-hex offset");
            return;
        };
        match resolve_entry(Path::new(raw), document_dir, work_dir, build_dir, exists) {
            Some(resolved) => {
                debug!(
                    offset = %FlashDescriptor::format_offset(offset),
                    path = %resolved.display(),
                    "Resolved flash entry"
                );
                entries.insert(offset, resolved);
            }
            None => {
                warn!(context = %context, path = raw, "Flash entry not found");
                unresolved.push(UnresolvedEntry {
                    context,
                    original: raw.to_string(),
                    searched: candidate_paths(Path::new(raw), document_dir, work_dir, build_dir),
                });
            }
        }
    };

    for (offset_key, raw) in &document.flash_files {
        consider(offset_key, raw, offset_key.clone());
    }

    for (name, section) in document.sections() {
        let (Some(offset_key), Some(raw)) = (section.offset.as_deref(), section.file.as_deref())
        else {
            continue;
        };
        consider(offset_key, raw, format!("{name} ({offset_key})"));
    }

    if entries.is_empty() {
        return Err(EspvError::NoValidEntries);
    }

    Ok(ResolvedLayout {
        descriptor: FlashDescriptor {
            entries,
            write_flash_args: document.effective_write_flash_args(),
            extra: document.effective_extra_args(),
        },
        unresolved,
    })
}

/// Parse an offset key, accepting only `0x` followed by hex digits.
fn parse_offset(key: &str) -> Option<u32> {
    let digits = key.strip_prefix("0x")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Try each candidate location in order; first hit wins, normalized.
fn resolve_entry(
    raw: &Path,
    document_dir: &Path,
    work_dir: &Path,
    build_dir: &Path,
    exists: &dyn Fn(&Path) -> bool,
) -> Option<PathBuf> {
    if raw.as_os_str().is_empty() {
        return None;
    }
    candidate_paths(raw, document_dir, work_dir, build_dir)
        .into_iter()
        .find(|candidate| exists(candidate))
        .map(|winner| normalize_lexical(&winner))
}

/// Ordered candidate locations for a document path.
///
/// 1. as given (absolute, or relative to the working directory)
/// 2. joined to the document directory
/// 3. filename only, in the document directory
/// 4. joined to the build-output directory
/// 5. filename only, in the build-output directory
pub fn candidate_paths(
    raw: &Path,
    document_dir: &Path,
    work_dir: &Path,
    build_dir: &Path,
) -> Vec<PathBuf> {
    let filename = raw.file_name().map_or_else(|| raw.to_path_buf(), PathBuf::from);
    let build = work_dir.join(build_dir);
    vec![
        work_dir.join(raw),
        document_dir.join(raw),
        document_dir.join(&filename),
        build.join(raw),
        build.join(&filename),
    ]
}

/// Resolve `.` and `..` segments lexically, without touching the filesystem.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Only pop a real segment; keep leading `..` on relative paths
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
