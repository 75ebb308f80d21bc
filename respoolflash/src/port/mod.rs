//! Port abstraction for cross-platform serial communication.
//!
//! The orchestration layer never talks to `serialport` directly. Everything
//! it needs from a serial transport is expressed by the [`Port`] trait:
//!
//! - byte I/O (`Read` + `Write`)
//! - lifecycle (`is_open`, `open`, `close`), because a port selected by the
//!   user is an identity that may be opened and closed several times during
//!   one session
//! - the two control lines (DTR/RTS) used for reset pulses
//! - optional capabilities (`supports_control_lines`, `usb_vendor_id`) that
//!   a transport may not offer
//!
//! ```text
//! +----------------------+
//! |  Orchestrator / reset|
//! |  identify / configure|
//! +----------+-----------+
//!            |
//!            v
//! +----------+-----------+
//! |      Port trait      |
//! +----------+-----------+
//!            |
//!            v
//! +----------+-----------+
//! |  NativePort          |
//! |  (serialport crate)  |
//! +----------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate used whenever a port has to be (re)opened outside a loader session.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

/// Serial port information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Port info carrying only a name, for ports the host cannot describe.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Whether the port currently holds an open OS handle.
    fn is_open(&self) -> bool;

    /// Open (or reopen) the port at the given baud rate.
    ///
    /// Opening an already open port only changes the baud rate.
    fn open(&mut self, baud_rate: u32) -> Result<()>;

    /// Close the port and release the OS handle.
    ///
    /// The port identity survives and can be reopened with [`Port::open`].
    fn close(&mut self) -> Result<()>;

    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Set DTR (Data Terminal Ready) pin state.
    ///
    /// Fails with [`crate::Error::InvalidState`] when the port is closed.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    ///
    /// Fails with [`crate::Error::InvalidState`] when the port is closed.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Set both control lines, DTR first.
    fn set_signals(&mut self, dtr: bool, rts: bool) -> Result<()> {
        self.set_dtr(dtr)?;
        self.set_rts(rts)
    }

    /// Whether this transport can drive DTR/RTS at all.
    fn supports_control_lines(&self) -> bool {
        true
    }

    /// USB vendor id of the device behind the port, when the host knows it.
    fn usb_vendor_id(&self) -> Option<u16> {
        None
    }

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
