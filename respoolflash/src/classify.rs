//! Failure classification and driver help.
//!
//! Most connection failures on a fresh machine come down to a missing
//! USB-UART driver or a port that belongs to something else. Those failures
//! are recognised here so the user can be pointed at the driver downloads,
//! once per session.

use crate::error::Error;

/// Lower-case fragments of messages that point at the port or its driver.
const PORT_OR_DRIVER_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "not detected",
    "nicht erkannt",
    "failed to open serial port",
    "failed to open",
    "could not open",
    "failed to connect",
    "permission denied",
    "access denied",
    "access is denied",
    "networkerror",
    "network error",
    "no serial data",
];

/// Verdict on a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    /// The failure most likely comes from the port or a missing driver.
    pub is_likely_port_or_driver_issue: bool,
}

/// Classify a failure message.
pub fn classify(message: &str) -> Classification {
    let lower = message.to_lowercase();
    Classification {
        is_likely_port_or_driver_issue: PORT_OR_DRIVER_PATTERNS
            .iter()
            .any(|p| lower.contains(p)),
    }
}

/// Classify an error by kind, falling back to its message.
pub fn classify_error(err: &Error) -> Classification {
    match err {
        Error::SyncTimeout { .. } | Error::LikelyWrongDevice { .. } | Error::Timeout(_) => {
            Classification {
                is_likely_port_or_driver_issue: true,
            }
        },
        Error::NoPortSelected => Classification::default(),
        other => classify(&other.to_string()),
    }
}

/// A driver download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverLink {
    /// Bridge chip vendor and family.
    pub name: &'static str,
    /// Download page.
    pub url: &'static str,
}

/// Guidance shown for port or driver problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverHelp {
    /// Heading.
    pub title: &'static str,
    /// Explanation.
    pub body: &'static str,
    /// What a correct port name looks like on each platform.
    pub example_ports: &'static [&'static str],
    /// Driver downloads for the bridges used on DevKit boards.
    pub driver_links: &'static [DriverLink],
    /// What to try after installing a driver.
    pub hint: &'static str,
}

const DRIVER_LINKS: &[DriverLink] = &[
    DriverLink {
        name: "Silicon Labs CP210x",
        url: "https://www.silabs.com/developers/usb-to-uart-bridge-vcp-drivers",
    },
    DriverLink {
        name: "WCH CH340/CH341",
        url: "https://www.wch-ic.com/downloads/CH341SER_EXE.html",
    },
];

const EXAMPLE_PORTS: &[&str] = &[
    "COM3",
    "/dev/ttyUSB0",
    "/dev/cu.usbserial-0001",
    "/dev/cu.usbmodem1101",
];

/// Static driver help content.
pub fn driver_help() -> DriverHelp {
    DriverHelp {
        title: "ESP32 not detected?",
        body: "The board did not answer on the selected port. Make sure you picked the \
               USB serial port of the board and that the USB-UART driver is installed.",
        example_ports: EXAMPLE_PORTS,
        driver_links: DRIVER_LINKS,
        hint: "After installing a driver, unplug the board, plug it back in and connect again. \
               Use a data-capable USB cable.",
    }
}

/// Lets driver help through at most once.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelpGate {
    shown: bool,
}

impl HelpGate {
    /// Whether help should be shown for a failure with this classification.
    ///
    /// Returns `true` at most once per gate.
    pub fn offer(&mut self, classification: Classification) -> bool {
        if classification.is_likely_port_or_driver_issue && !self.shown {
            self.shown = true;
            return true;
        }
        false
    }

    /// Whether help was already shown.
    pub fn was_shown(&self) -> bool {
        self.shown
    }
}
