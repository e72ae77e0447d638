//! ESP provisioning CLI - flash layout resolution, device flashing,
//! manufacturing telemetry capture, and OTA patch packaging.
#![forbid(unsafe_code)]

use std::io::{self, IsTerminal};

use clap::{CommandFactory, Parser};
use console::style;
use serde::Serialize;
use tracing::warn;

use espv::cli::{
    Cli, Commands, CompletionsArgs, FlashArgs, MonitorArgs, PatchArgs, PatchInfoArgs, ResetArgs,
    ResolveArgs,
};
use espv::error::{EspvError, Result};
use espv::layout::{self, FlashDescriptor, ResolvedLayout, UnresolvedEntry};
use espv::patch::{self, Packager};
use espv::records::RecordStore;
use espv::session::{self, DeviceSession, DiffClient, EsptoolClient, MonitorEvent};

fn main() {
    let cli = Cli::parse();

    // Handle no-color flag or non-TTY
    if cli.no_color || !io::stdout().is_terminal() {
        console::set_colors_enabled(false);
    }

    espv::logging::init_logging(cli.use_json(), cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        output_error(&cli, &e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        None => print_quick_start(cli),
        Some(Commands::Resolve(args)) => cmd_resolve(cli, args),
        Some(Commands::Flash(args)) => cmd_flash(cli, args),
        Some(Commands::Ports) => cmd_ports(cli),
        Some(Commands::Reset(args)) => cmd_reset(args),
        Some(Commands::Monitor(args)) => cmd_monitor(cli, args),
        Some(Commands::Patch(args)) => cmd_patch(cli, args),
        Some(Commands::PatchInfo(args)) => cmd_patch_info(cli, args),
        Some(Commands::Version) => cmd_version(cli),
        Some(Commands::Completions(args)) => cmd_completions(args),
    }
}

// === Error Output ===

#[derive(Serialize)]
struct RobotError<'a> {
    error: String,
    recoverable: bool,
    suggestion: Option<&'a str>,
}

fn output_error(cli: &Cli, error: &EspvError) {
    if cli.use_json() {
        let payload = RobotError {
            error: error.to_string(),
            recoverable: error.is_user_recoverable(),
            suggestion: error.suggestion(),
        };
        eprintln!("{}", serde_json::to_string(&payload).unwrap_or_default());
    } else {
        eprintln!("{} {error}", style("error:").red().bold());
        if let Some(suggestion) = error.suggestion() {
            eprintln!("  {} {suggestion}", style("hint:").yellow());
        }
    }
}

// === Quick Start ===

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn print_quick_start(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        let help = serde_json::json!({
            "tool": "espv",
            "version": env!("CARGO_PKG_VERSION"),
            "commands": {
                "resolve": "espv resolve flasher_args.json",
                "flash": "espv flash flasher_args.json -p /dev/ttyUSB0",
                "monitor": "espv monitor -p /dev/ttyUSB0 -t records.csv",
                "reset": "espv reset -p /dev/ttyUSB0",
                "patch": "espv patch base.bin new.bin --chip esp32c6",
                "ports": "espv ports",
            },
        });
        println!("{}", serde_json::to_string_pretty(&help).unwrap_or_default());
    } else {
        println!(
            "{} {} - ESP provisioning CLI\n",
            style("espv").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!("  {}  Resolve a layout document", style("espv resolve flasher_args.json").green());
        println!("  {}  Flash a device", style("espv flash flasher_args.json -p /dev/ttyUSB0").green());
        println!("  {}  Capture manufacturing records", style("espv monitor -p /dev/ttyUSB0 -t records.csv").green());
        println!("  {}  Package an OTA patch", style("espv patch base.bin new.bin").green());
        println!();
        println!("Run {} for full help", style("espv --help").yellow());
    }
    Ok(())
}

// === Robot Output Structures ===

#[derive(Serialize)]
struct RobotEntry {
    offset: String,
    path: String,
}

#[derive(Serialize)]
struct RobotUnresolved<'a> {
    context: &'a str,
    original: &'a str,
    searched: Vec<String>,
}

#[derive(Serialize)]
struct RobotDescriptor<'a> {
    entries: Vec<RobotEntry>,
    write_flash_args: &'a [String],
    before: &'a str,
    after: &'a str,
    chip: &'a str,
    unresolved: Vec<RobotUnresolved<'a>>,
}

fn robot_descriptor(resolved: &ResolvedLayout) -> RobotDescriptor<'_> {
    let descriptor = &resolved.descriptor;
    RobotDescriptor {
        entries: descriptor
            .entries
            .iter()
            .map(|(offset, path)| RobotEntry {
                offset: FlashDescriptor::format_offset(*offset),
                path: path.display().to_string(),
            })
            .collect(),
        write_flash_args: &descriptor.write_flash_args,
        before: &descriptor.extra.before,
        after: &descriptor.extra.after,
        chip: &descriptor.extra.chip,
        unresolved: resolved
            .unresolved
            .iter()
            .map(|u| RobotUnresolved {
                context: &u.context,
                original: &u.original,
                searched: u.searched.iter().map(|p| p.display().to_string()).collect(),
            })
            .collect(),
    }
}

fn print_unresolved_warnings(unresolved: &[UnresolvedEntry]) {
    for entry in unresolved {
        eprintln!(
            "{} {} not found for {}",
            style("warning:").yellow().bold(),
            entry.original,
            entry.context
        );
        for location in &entry.searched {
            eprintln!("    searched {}", location.display());
        }
    }
}

// === Commands ===

fn cmd_resolve(cli: &Cli, args: &ResolveArgs) -> Result<()> {
    let resolved = layout::load_layout(&args.layout)?;

    if cli.use_json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&robot_descriptor(&resolved)).unwrap_or_default()
        );
        return Ok(());
    }

    print_unresolved_warnings(&resolved.unresolved);
    let descriptor = &resolved.descriptor;
    println!(
        "{} ({} entries, chip {})",
        style("Flash descriptor").bold(),
        descriptor.entries.len(),
        descriptor.extra.chip
    );
    for (offset, path) in &descriptor.entries {
        println!(
            "  {:<10} {}",
            style(FlashDescriptor::format_offset(*offset)).cyan(),
            path.display()
        );
    }
    println!("  args: {}", descriptor.write_flash_args.join(" "));
    Ok(())
}

fn cmd_flash(cli: &Cli, args: &FlashArgs) -> Result<()> {
    let resolved = layout::load_layout(&args.layout)?;
    print_unresolved_warnings(&resolved.unresolved);

    let esptool = EsptoolClient::new(&cli.esptool);
    let command = EsptoolClient::write_flash_args(&resolved.descriptor, &args.port, args.baudrate);
    if !cli.quiet {
        println!("{} {}", style("command:").dim(), command.join(" "));
    }

    let status = esptool.write_flash(&resolved.descriptor, &args.port, args.baudrate, &mut |line| {
        println!("{line}");
    })?;

    if cli.use_json() {
        println!(
            "{}",
            serde_json::json!({"flashed": resolved.descriptor.entries.len(), "status": status.code()})
        );
    } else {
        println!("{}", style("Device flashed successfully").green().bold());
    }
    Ok(())
}

fn cmd_ports(cli: &Cli) -> Result<()> {
    let ports = session::list_ports()?;

    if cli.use_json() {
        let listing: Vec<_> = ports
            .iter()
            .map(|p| serde_json::json!({"name": p.port_name, "kind": port_kind(&p.port_type)}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing).unwrap_or_default());
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports detected");
        return Ok(());
    }
    for port in &ports {
        println!("  {:<20} {}", style(&port.port_name).cyan(), port_kind(&port.port_type));
    }
    Ok(())
}

fn port_kind(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            match &usb.serial_number {
                Some(serial) => format!("{product} ({serial})"),
                None => product.to_string(),
            }
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        serialport::SerialPortType::PciPort => "PCI".to_string(),
        serialport::SerialPortType::Unknown => "unknown".to_string(),
    }
}

fn cmd_reset(args: &ResetArgs) -> Result<()> {
    session::reset_device(&args.port)?;
    println!("Reset pulse sent to {}", args.port);
    Ok(())
}

fn cmd_monitor(cli: &Cli, args: &MonitorArgs) -> Result<()> {
    let store = args.table.as_ref().map(RecordStore::new);
    let mut device = DeviceSession::new();
    let monitor = device.start_monitor(&args.port, args.baudrate)?;

    if !cli.quiet {
        eprintln!(
            "{} {} @ {} (Ctrl-C to stop)",
            style("monitoring").bold(),
            args.port,
            args.baudrate
        );
    }

    for event in monitor.events() {
        match event {
            MonitorEvent::Line(line) => println!("{line}"),
            MonitorEvent::Record(record) => {
                let Some(store) = &store else {
                    warn!("Manufacturing record seen but no --table configured");
                    continue;
                };
                match store.upsert(&record) {
                    Ok(rows) => {
                        eprintln!(
                            "{} stored {} ({} rows)",
                            style("record:").green(),
                            record.hw_id().unwrap_or_default(),
                            rows
                        );
                    }
                    // A bad record must not stop the monitoring session
                    Err(e) => eprintln!("{} {e}", style("record error:").red()),
                }
            }
            MonitorEvent::Terminated { reason } => {
                eprintln!("{} {reason}", style("monitor stopped:").yellow());
                break;
            }
        }
    }

    device.stop_monitor();
    Ok(())
}

fn cmd_patch(cli: &Cli, args: &PatchArgs) -> Result<()> {
    let packager = Packager::new(
        EsptoolClient::new(&cli.esptool),
        DiffClient::new(&args.diff_tool, args.compression.clone()),
    );
    let created = packager.create_patch(&args.base, &args.target, &args.chip, args.out.as_deref())?;

    if cli.use_json() {
        println!(
            "{}",
            serde_json::json!({
                "path": created.path.display().to_string(),
                "fingerprint": created.fingerprint.to_string(),
                "payload_len": created.payload_len,
            })
        );
    } else {
        println!("{} {}", style("created").green().bold(), created.path.display());
        println!("  base fingerprint: {}", created.fingerprint);
        println!("  delta payload:    {} bytes", created.payload_len);
    }
    Ok(())
}

fn cmd_patch_info(cli: &Cli, args: &PatchInfoArgs) -> Result<()> {
    let info = patch::read_header(&args.file)?;

    if cli.use_json() {
        println!(
            "{}",
            serde_json::json!({
                "magic": format!("{:#010x}", patch::PATCH_MAGIC),
                "fingerprint": info.fingerprint.to_string(),
                "payload_len": info.payload_len,
            })
        );
    } else {
        println!("{} {}", style("patch container").bold(), args.file.display());
        println!("  base fingerprint: {}", info.fingerprint);
        println!("  delta payload:    {} bytes", info.payload_len);
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)]
fn cmd_version(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        println!(
            "{}",
            serde_json::json!({"name": "espv", "version": env!("CARGO_PKG_VERSION")})
        );
    } else {
        println!("espv {}", env!("CARGO_PKG_VERSION"));
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)]
fn cmd_completions(args: &CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(args.shell, &mut cmd, "espv", &mut io::stdout());
    Ok(())
}
