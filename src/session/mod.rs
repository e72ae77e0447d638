//! Device session gateway: external tools, serial monitoring, device reset.
//!
//! The session object owns the active monitoring session so only one can
//! exist at a time; starting a new one always stops and joins the previous
//! worker before the transport is reopened.

pub mod monitor;
pub mod tools;

pub use monitor::{MonitorEvent, MonitorSession};
pub use tools::{DiffClient, EsptoolClient, ToolOutput};

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{EspvError, Result};

/// Baud rate used for the reset pulse and monitoring by default.
pub const MONITOR_BAUDRATE: u32 = 115_200;

/// Hold time between the two reset line toggles.
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Owner of the (at most one) active monitoring session.
#[derive(Default)]
pub struct DeviceSession {
    monitor: Option<MonitorSession>,
}

impl DeviceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring a port, replacing any previous session.
    ///
    /// The previous session is fully stopped and its worker joined before
    /// the new transport is opened; overlapping sessions are impossible.
    pub fn start_monitor(&mut self, port: &str, baudrate: u32) -> Result<&MonitorSession> {
        self.stop_monitor();
        let session = MonitorSession::open(port, baudrate)?;
        Ok(self.monitor.insert(session))
    }

    pub const fn monitor(&self) -> Option<&MonitorSession> {
        self.monitor.as_ref()
    }

    /// Stop and join the active session, if any.
    pub fn stop_monitor(&mut self) {
        if let Some(session) = self.monitor.take() {
            debug!("Stopping previous monitoring session");
            session.stop();
        }
    }
}

/// Trigger a hardware reset by toggling the DTR/RTS control lines.
pub fn reset_device(port: &str) -> Result<()> {
    let transport_err = |e: serialport::Error| EspvError::Transport {
        port: port.to_string(),
        detail: e.to_string(),
    };

    let mut serial = serialport::new(port, MONITOR_BAUDRATE)
        .timeout(Duration::from_millis(500))
        .open()
        .map_err(transport_err)?;

    serial.write_data_terminal_ready(false).map_err(transport_err)?;
    serial.write_request_to_send(true).map_err(transport_err)?;
    std::thread::sleep(RESET_PULSE);
    serial.write_data_terminal_ready(true).map_err(transport_err)?;
    serial.write_request_to_send(false).map_err(transport_err)?;

    info!(port, "Reset pulse sent");
    Ok(())
}

/// Enumerate serial ports visible to the system.
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    serialport::available_ports().map_err(|e| EspvError::Transport {
        port: "<enumeration>".to_string(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_session_owns_one_monitor_at_a_time() {
        let mut session = DeviceSession::new();
        assert!(session.monitor().is_none());

        // Simulate via the reader-backed constructor; open() needs hardware.
        session.monitor = Some(MonitorSession::from_reader(Cursor::new(String::new())));
        assert!(session.monitor().is_some());

        session.stop_monitor();
        assert!(session.monitor().is_none());
    }

    #[test]
    fn test_start_monitor_on_bad_port_is_transport_error() {
        let mut session = DeviceSession::new();
        let result = session.start_monitor("/nonexistent/espv-test-port", MONITOR_BAUDRATE);
        assert!(matches!(result, Err(EspvError::Transport { .. })));
    }
}
