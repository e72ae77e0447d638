//! CLI argument definitions and command dispatch.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// ESP provisioning CLI - flash layout resolution, device flashing,
/// manufacturing telemetry capture, and OTA patch packaging.
///
/// Robot Mode: Use --robot or --format=json for machine-parseable output.
#[derive(Parser, Debug)]
#[command(name = "espv", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (text for humans, json for scripts)
    #[arg(
        long,
        short = 'f',
        default_value = "text",
        global = true,
        env = "ESPV_FORMAT"
    )]
    pub format: OutputFormat,

    /// Robot mode: equivalent to --format=json
    #[arg(long, global = true)]
    pub robot: bool,

    /// Verbose output (repeat for trace level)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable colored output
    ///
    /// NO_COLOR is conventionally set to any non-empty value, so it is
    /// parsed leniently rather than as a strict bool.
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Path to the esptool executable
    #[arg(long, global = true, default_value = "esptool.py", env = "ESPV_ESPTOOL")]
    pub esptool: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with optional color
    #[default]
    Text,
    /// JSON output for scripts
    Json,
}

impl Cli {
    /// Returns true if output should be JSON (robot mode or explicit --format=json).
    pub const fn use_json(&self) -> bool {
        self.robot || matches!(self.format, OutputFormat::Json)
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    // === Layout & Flashing ===
    /// Resolve a layout document and show the flash descriptor
    Resolve(ResolveArgs),

    /// Flash the device with the images from a layout document
    Flash(FlashArgs),

    // === Device Control ===
    /// List available serial ports
    Ports,

    /// Hardware-reset the device via the DTR/RTS lines
    Reset(ResetArgs),

    /// Monitor the serial link and capture manufacturing records
    Monitor(MonitorArgs),

    // === OTA Patching ===
    /// Package a base-to-target firmware delta into a patch container
    Patch(PatchArgs),

    /// Inspect a patch container header
    PatchInfo(PatchInfoArgs),

    // === Utilities ===
    /// Show version information
    Version,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// === Argument Structs ===

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Layout document (flasher_args.json)
    pub layout: PathBuf,
}

#[derive(Parser, Debug)]
pub struct FlashArgs {
    /// Layout document (flasher_args.json)
    pub layout: PathBuf,

    /// Serial port (e.g. /dev/ttyUSB0, COM3)
    #[arg(long, short = 'p', env = "ESPV_PORT")]
    pub port: String,

    /// Baud rate for flashing
    #[arg(long, short = 'b', default_value = "460800")]
    pub baudrate: u32,
}

#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Serial port
    #[arg(long, short = 'p', env = "ESPV_PORT")]
    pub port: String,
}

#[derive(Parser, Debug)]
pub struct MonitorArgs {
    /// Serial port
    #[arg(long, short = 'p', env = "ESPV_PORT")]
    pub port: String,

    /// Baud rate for monitoring
    #[arg(long, short = 'b', default_value = "115200")]
    pub baudrate: u32,

    /// Manufacturing record table (CSV); records are upserted by hw_id
    #[arg(long, short = 't', env = "ESPV_TABLE")]
    pub table: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct PatchArgs {
    /// Base firmware image (what is currently on the device)
    pub base: PathBuf,

    /// Target firmware image (what the device should run)
    pub target: PathBuf,

    /// Chip identifier passed to the inspection step
    #[arg(long, default_value = "esp32")]
    pub chip: String,

    /// Destination path (defaults to patch_<base>_to_<target>.bin)
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// Path to the binary-diff tool
    #[arg(long, default_value = "detools", env = "ESPV_DIFF_TOOL")]
    pub diff_tool: PathBuf,

    /// Compression scheme handed to the diff tool
    #[arg(long, default_value = "heatshrink")]
    pub compression: String,
}

#[derive(Parser, Debug)]
pub struct PatchInfoArgs {
    /// Patch container file
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
