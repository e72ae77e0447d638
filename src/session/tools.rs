//! External tool invocation: esptool and the binary-diff utility.
//!
//! Both tools are driven as black-box subprocesses. Command lines are built
//! by pure functions so the exact invocation stays deterministic and
//! reviewable; output scraping lives behind the fingerprint adapter in
//! [`crate::patch::fingerprint`].

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::error::{EspvError, Result};
use crate::layout::FlashDescriptor;
use crate::patch::fingerprint::{self, Fingerprint};

/// Ceiling applied to inspection (`image_info`) calls.
pub const INSPECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output of a finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Diagnostic text for error reporting: stderr if any, else stdout.
    pub fn diagnostics(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Client for the external flashing utility (esptool).
#[derive(Debug, Clone)]
pub struct EsptoolClient {
    program: PathBuf,
}

impl Default for EsptoolClient {
    fn default() -> Self {
        Self::new("esptool.py")
    }
}

impl EsptoolClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build the full `write_flash` argument list for a descriptor.
    ///
    /// Offset/path pairs are emitted in ascending offset order so the command
    /// is stable across runs.
    pub fn write_flash_args(descriptor: &FlashDescriptor, port: &str, baudrate: u32) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            port.to_string(),
            "-b".to_string(),
            baudrate.to_string(),
            "--before".to_string(),
            descriptor.extra.before.clone(),
            "--after".to_string(),
            descriptor.extra.after.clone(),
            "--chip".to_string(),
            descriptor.extra.chip.clone(),
            "write_flash".to_string(),
        ];
        args.extend(descriptor.write_flash_args.iter().cloned());
        for (offset, path) in &descriptor.entries {
            args.push(FlashDescriptor::format_offset(*offset));
            args.push(path.display().to_string());
        }
        args
    }

    /// Flash all descriptor entries, streaming tool output to `on_line`.
    ///
    /// A non-zero exit aborts with the tool's captured stderr attached.
    pub fn write_flash(
        &self,
        descriptor: &FlashDescriptor,
        port: &str,
        baudrate: u32,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ExitStatus> {
        let args = Self::write_flash_args(descriptor, port, baudrate);
        info!(
            program = %self.program.display(),
            entries = descriptor.entries.len(),
            "Starting flash process"
        );
        debug!(command = ?args, "write_flash command line");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error("esptool", &self.program, &e))?;

        let stderr = child.stderr.take().map(drain_to_string);
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => on_line(&line),
                    Err(_) => break,
                }
            }
        }

        let status = child.wait()?;
        let stderr = stderr.map(join_reader).unwrap_or_default();
        if status.success() {
            Ok(status)
        } else {
            Err(EspvError::ToolInvocation {
                tool: "esptool".to_string(),
                detail: exit_detail(status, &stderr),
            })
        }
    }

    /// Run `image_info` against a single image, under the inspection ceiling.
    pub fn image_info(&self, image: &Path, chip: &str) -> Result<ToolOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--chip")
            .arg(chip)
            .arg("image_info")
            .arg(image);
        trace!(image = %image.display(), chip, "Running image_info");
        run_with_timeout(cmd, &self.program, "esptool", Some(INSPECTION_TIMEOUT))
    }

    /// Query the validation-hash fingerprint the tool reports for an image.
    ///
    /// Succeeds only when the invocation exits cleanly *and* its output
    /// carries a hash marked valid.
    pub fn image_fingerprint(&self, image: &Path, chip: &str) -> Result<Fingerprint> {
        let output = self.image_info(image, chip)?;
        if !output.status.success() {
            return Err(EspvError::FingerprintUnavailable {
                detail: exit_detail(output.status, &output.diagnostics()),
            });
        }
        fingerprint::parse_validation_hash(&output.stdout)
    }
}

/// Client for the external binary-diff utility.
#[derive(Debug, Clone)]
pub struct DiffClient {
    program: PathBuf,
    compression: String,
}

impl Default for DiffClient {
    fn default() -> Self {
        Self::new("detools", "heatshrink")
    }
}

impl DiffClient {
    pub fn new(program: impl Into<PathBuf>, compression: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            compression: compression.into(),
        }
    }

    /// Compute a compressed delta from `base` to `target`, written to `out`.
    pub fn create_delta(&self, base: &Path, target: &Path, out: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("create_patch")
            .arg("--compression")
            .arg(&self.compression)
            .arg(base)
            .arg(target)
            .arg(out);
        debug!(
            program = %self.program.display(),
            compression = %self.compression,
            "Running delta tool"
        );

        let output = run_with_timeout(cmd, &self.program, "diff tool", None)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EspvError::DiffFailed {
                detail: exit_detail(output.status, &output.diagnostics()),
            })
        }
    }
}

/// Run a command to completion, optionally killing it at a deadline.
///
/// Output pipes are drained on separate threads so a chatty tool cannot
/// deadlock against a full pipe buffer.
fn run_with_timeout(
    mut cmd: Command,
    program: &Path,
    tool: &str,
    timeout: Option<Duration>,
) -> Result<ToolOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(tool, program, &e))?;

    let stdout = child.stdout.take().map(drain_to_string);
    let stderr = child.stderr.take().map(drain_to_string);

    let deadline = timeout.map(|t| Instant::now() + t);
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EspvError::ToolTimeout {
                    tool: tool.to_string(),
                    secs: timeout.unwrap_or_default().as_secs(),
                });
            }
        }
        std::thread::sleep(Duration::from_millis(25));
    };

    Ok(ToolOutput {
        status,
        stdout: stdout.map(join_reader).unwrap_or_default(),
        stderr: stderr.map(join_reader).unwrap_or_default(),
    })
}

fn drain_to_string<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn spawn_error(tool: &str, program: &Path, err: &std::io::Error) -> EspvError {
    EspvError::ToolInvocation {
        tool: tool.to_string(),
        detail: format!("failed to launch {}: {err}", program.display()),
    }
}

fn exit_detail(status: ExitStatus, diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        format!("exited with {status}")
    } else {
        format!("exited with {status}: {diagnostics}")
    }
}
