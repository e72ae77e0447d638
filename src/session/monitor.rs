//! Serial monitoring sessions.
//!
//! Each session owns its transport handle and exactly one background worker
//! that performs blocking reads with a short per-read timeout, decodes
//! manufacturing telemetry, and forwards events over a channel. Cancellation
//! is cooperative: the stop flag is observed every read iteration and the
//! worker is joined before the transport is released.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{EspvError, Result};
use crate::records::{ManufacturingRecord, extract_record};

/// Per-read timeout; bounds how long a stop request can go unobserved.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Events delivered from the monitoring worker.
#[derive(Debug)]
pub enum MonitorEvent {
    /// One decoded text line from the device.
    Line(String),
    /// A manufacturing record found embedded in a line.
    Record(ManufacturingRecord),
    /// The worker stopped on its own; no further events follow. Transport
    /// errors arrive here rather than surfacing to the foreground.
    Terminated { reason: String },
}

/// An active monitoring session: transport handle, worker thread, event feed.
pub struct MonitorSession {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    events: Receiver<MonitorEvent>,
}

impl MonitorSession {
    /// Open the serial port and start the monitoring worker.
    pub fn open(port: &str, baudrate: u32) -> Result<Self> {
        let serial = serialport::new(port, baudrate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| EspvError::Transport {
                port: port.to_string(),
                detail: e.to_string(),
            })?;
        info!(port, baudrate, "Monitoring started");
        Ok(Self::from_reader(serial))
    }

    /// Start a session over any blocking byte stream.
    ///
    /// Timeout-style read errors (`TimedOut`, `WouldBlock`) are treated as
    /// idle polls, matching serial-port semantics.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, events) = channel();
        let flag = Arc::clone(&stop);
        let worker = std::thread::spawn(move || read_loop(reader, &flag, &tx));
        Self {
            stop,
            worker: Some(worker),
            events,
        }
    }

    /// The event feed for this session.
    pub const fn events(&self) -> &Receiver<MonitorEvent> {
        &self.events
    }

    /// Stop cooperatively and join the worker, releasing the transport.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Monitor worker panicked during shutdown");
            }
            debug!("Monitor worker joined");
        }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(reader: impl Read, stop: &AtomicBool, tx: &Sender<MonitorEvent>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                let _ = tx.send(MonitorEvent::Terminated {
                    reason: "end of stream".to_string(),
                });
                return;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                buf.clear();
                if line.is_empty() {
                    continue;
                }
                let record = extract_record(&line);
                if tx.send(MonitorEvent::Line(line)).is_err() {
                    return;
                }
                if let Some(record) = record {
                    if tx.send(MonitorEvent::Record(record)).is_err() {
                        return;
                    }
                }
            }
            // Idle poll; keep any partial line in `buf` and re-check stop
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                warn!(error = %e, "Serial read failed; stopping monitor");
                let _ = tx.send(MonitorEvent::Terminated {
                    reason: e.to_string(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::time::Instant;

    #[test]
    fn test_lines_and_records_from_stream() {
        let input = "boot ok\nnoise {\"type\":\"mfg\",\"hw_id\":\"DEV1\",\"result\":\"pass\"} noise\n";
        let session = MonitorSession::from_reader(Cursor::new(input.to_string()));

        let mut lines = Vec::new();
        let mut records = Vec::new();
        let mut terminated = None;
        for event in session.events() {
            match event {
                MonitorEvent::Line(l) => lines.push(l),
                MonitorEvent::Record(r) => records.push(r),
                MonitorEvent::Terminated { reason } => terminated = Some(reason),
            }
        }

        assert_eq!(lines.len(), 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hw_id().as_deref(), Some("DEV1"));
        assert_eq!(terminated.as_deref(), Some("end of stream"));
    }

    #[test]
    fn test_crlf_trimmed() {
        let session = MonitorSession::from_reader(Cursor::new("hello\r\n".to_string()));
        let event = session.events().recv().unwrap();
        match event {
            MonitorEvent::Line(l) => assert_eq!(l, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// Reader that never produces data, like an idle serial port.
    struct IdleReader;

    impl Read for IdleReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(10));
            Err(io::Error::new(io::ErrorKind::TimedOut, "poll timeout"))
        }
    }

    #[test]
    fn test_stop_joins_idle_worker_promptly() {
        let session = MonitorSession::from_reader(IdleReader);
        let start = Instant::now();
        session.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    /// Reader that fails hard after one line.
    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                Err(io::Error::other("device unplugged"))
            } else {
                self.sent = true;
                let data = b"one line\n";
                buf[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
        }
    }

    #[test]
    fn test_transport_error_becomes_terminal_event() {
        let session = MonitorSession::from_reader(FailingReader { sent: false });
        let events: Vec<_> = session.events().iter().collect();
        assert!(matches!(events.first(), Some(MonitorEvent::Line(_))));
        match events.last() {
            Some(MonitorEvent::Terminated { reason }) => {
                assert!(reason.contains("unplugged"));
            }
            other => panic!("expected terminal event, got {other:?}"),
        }
    }
}
