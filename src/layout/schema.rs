//! Serde schema for the flasher layout document.
//!
//! Two shapes coexist in the wild and both are accepted: an explicit
//! `flash_files` offset-to-path map, and per-artifact sections (`bootloader`,
//! `app`, `partition-table`, ...) that each carry their own offset and file.
//! Unknown keys are ignored so documents from newer build systems still load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Baseline `write_flash` arguments used when the document omits them.
pub const DEFAULT_WRITE_FLASH_ARGS: [&str; 6] = [
    "--flash_mode",
    "dio",
    "--flash_size",
    "10MB",
    "--flash_freq",
    "80m",
];

/// Section names probed in the modular document shape, in merge order.
pub const SECTION_NAMES: [&str; 5] = ["bootloader", "app", "partition-table", "ota_data", "nvs"];

/// A named artifact section: one offset, one file.
#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    pub offset: Option<String>,
    pub file: Option<String>,
}

/// Auxiliary esptool options, defaulted field-by-field when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraEsptoolArgs {
    #[serde(default = "default_before")]
    pub before: String,
    #[serde(default = "default_after")]
    pub after: String,
    #[serde(default = "default_chip")]
    pub chip: String,
}

fn default_before() -> String {
    "default_reset".to_string()
}

fn default_after() -> String {
    "hard_reset".to_string()
}

fn default_chip() -> String {
    "esp32".to_string()
}

impl Default for ExtraEsptoolArgs {
    fn default() -> Self {
        Self {
            before: default_before(),
            after: default_after(),
            chip: default_chip(),
        }
    }
}

/// The parsed layout document (typically `flasher_args.json`).
///
/// `flash_files` uses a `BTreeMap` so merge order is deterministic across
/// loads; offset keys are raw strings here and validated by the resolver.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayoutDocument {
    #[serde(default)]
    pub flash_files: BTreeMap<String, String>,

    #[serde(default)]
    pub bootloader: Option<Section>,
    #[serde(default)]
    pub app: Option<Section>,
    #[serde(default, rename = "partition-table")]
    pub partition_table: Option<Section>,
    #[serde(default)]
    pub ota_data: Option<Section>,
    #[serde(default)]
    pub nvs: Option<Section>,

    #[serde(default)]
    pub write_flash_args: Option<Vec<String>>,
    #[serde(default)]
    pub extra_esptool_args: Option<ExtraEsptoolArgs>,
}

impl LayoutDocument {
    /// Sections in merge order, paired with their names for diagnostics.
    pub fn sections(&self) -> impl Iterator<Item = (&'static str, &Section)> {
        [
            (SECTION_NAMES[0], self.bootloader.as_ref()),
            (SECTION_NAMES[1], self.app.as_ref()),
            (SECTION_NAMES[2], self.partition_table.as_ref()),
            (SECTION_NAMES[3], self.ota_data.as_ref()),
            (SECTION_NAMES[4], self.nvs.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, section)| section.map(|s| (name, s)))
    }

    /// Flashing-mode arguments, falling back to the fixed baseline.
    pub fn effective_write_flash_args(&self) -> Vec<String> {
        self.write_flash_args.clone().unwrap_or_else(|| {
            DEFAULT_WRITE_FLASH_ARGS
                .iter()
                .map(ToString::to_string)
                .collect()
        })
    }

    /// Auxiliary options, fully defaulted when the document has none.
    pub fn effective_extra_args(&self) -> ExtraEsptoolArgs {
        self.extra_esptool_args.clone().unwrap_or_default()
    }
}
