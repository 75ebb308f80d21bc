//! Post-flash variant configuration.
//!
//! After a fresh flash the firmware boots without knowing which product it
//! runs in. The sub-variant is pushed to it as a single JSON line over the
//! same port:
//!
//! ```text
//! {"SET":{"VAR":"PRO"}}\n
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use serde_json::json;

use crate::board::SubVariant;
use crate::error::{Error, Result};
use crate::port::{DEFAULT_BAUD, Port};
use crate::timing::Delay;

/// Interval between writability checks.
pub const WRITABLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the port to become writable.
pub const WRITABLE_WAIT: Duration = Duration::from_secs(5);

/// Time the firmware gets to process the line.
pub const PROCESS_DELAY: Duration = Duration::from_millis(200);

/// The configuration line for `sub`, newline terminated.
pub fn config_line(sub: SubVariant) -> String {
    let mut line = json!({ "SET": { "VAR": sub.tag() } }).to_string();
    line.push('\n');
    line
}

/// Sends the sub-variant configuration line.
#[derive(Clone)]
pub struct VariantConfigTransmitter {
    delay: Arc<dyn Delay>,
}

impl VariantConfigTransmitter {
    /// Create a transmitter that waits through `delay`.
    pub fn new(delay: Arc<dyn Delay>) -> Self {
        Self { delay }
    }

    /// Send the configuration line. Failures are logged, never returned.
    pub fn send(&self, port: &mut dyn Port, sub: SubVariant) {
        if let Err(e) = self.try_send(port, sub) {
            error!("Failed to send variant configuration: {e}");
        }
    }

    /// Send the configuration line, reporting failures.
    ///
    /// Waits for the port to become writable, opens it at the default baud
    /// rate if it never does, writes the line and gives the firmware time
    /// to process it.
    pub fn try_send(&self, port: &mut dyn Port, sub: SubVariant) -> Result<()> {
        if !self.wait_writable(port) {
            debug!("{} not writable, opening at {DEFAULT_BAUD}", port.name());
            port.open(DEFAULT_BAUD)
                .map_err(|e| Error::ConfigWriteFailed(format!("failed to open serial port: {e}")))?;
        }

        let line = config_line(sub);
        let written = port
            .write_all_bytes(line.as_bytes())
            .map_err(|e| Error::ConfigWriteFailed(e.to_string()));
        if written.is_ok() {
            info!("Sent configuration {}", line.trim_end());
        }
        self.delay.sleep(PROCESS_DELAY);
        written
    }

    fn wait_writable(&self, port: &mut dyn Port) -> bool {
        let polls = WRITABLE_WAIT.as_millis() / WRITABLE_POLL_INTERVAL.as_millis();
        for _ in 0..polls {
            if port.is_open() {
                return true;
            }
            self.delay.sleep(WRITABLE_POLL_INTERVAL);
        }
        port.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Journal, MockPort, Op, RecordingDelay};

    fn transmitter(journal: &Journal) -> VariantConfigTransmitter {
        VariantConfigTransmitter::new(Arc::new(RecordingDelay::new(journal)))
    }

    #[test]
    fn test_config_line_is_compact_json() {
        assert_eq!(config_line(SubVariant::Pro), "{\"SET\":{\"VAR\":\"PRO\"}}\n");
        assert_eq!(config_line(SubVariant::Standard), "{\"SET\":{\"VAR\":\"STD\"}}\n");
    }

    #[test]
    fn test_writes_line_to_open_port() {
        let journal = Journal::default();
        let mut port = MockPort::new(&journal).opened();

        transmitter(&journal).send(&mut port, SubVariant::Pro);

        assert_eq!(journal.ops(), vec![
            Op::Write(b"{\"SET\":{\"VAR\":\"PRO\"}}\n".to_vec()),
            Op::Sleep(PROCESS_DELAY),
        ]);
    }

    #[test]
    fn test_opens_port_after_waiting() {
        let journal = Journal::default();
        let mut port = MockPort::new(&journal);

        transmitter(&journal).send(&mut port, SubVariant::Standard);

        let polls = journal.count(|op| *op == Op::Sleep(WRITABLE_POLL_INTERVAL));
        assert_eq!(polls, 50);
        assert_eq!(journal.count(|op| *op == Op::Open(115200)), 1);
        assert_eq!(journal.written(), b"{\"SET\":{\"VAR\":\"STD\"}}\n".to_vec());
    }

    #[test]
    fn test_open_failure_is_swallowed() {
        let journal = Journal::default();
        let mut port = MockPort::new(&journal).failing_opens(1);

        let err = transmitter(&journal)
            .try_send(&mut port, SubVariant::Pro)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigWriteFailed(_)));
        assert!(journal.written().is_empty());

        let mut port = MockPort::new(&journal).failing_opens(1);
        transmitter(&journal).send(&mut port, SubVariant::Pro);
    }
}
