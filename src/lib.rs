//! ESP provisioning library - flash layout resolution, OTA patch packaging,
//! and manufacturing telemetry capture for ESP-class devices.
//!
//! This library exposes the core functionality of the `espv` CLI for use in
//! tests and potentially other applications.
//!
//! # Modules
//!
//! - `layout`: Layout document parsing and flash descriptor resolution
//! - `patch`: OTA patch container format and packaging
//! - `records`: Manufacturing record decoding and CSV upsert store
//! - `session`: Device session gateway (external tools, serial monitor)
//! - `error`: Error types with user-recoverable hints
#![forbid(unsafe_code)]

pub mod cli;
pub mod error;
pub mod layout;
pub mod logging;
pub mod patch;
pub mod records;
pub mod session;
