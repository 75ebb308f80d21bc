//! Error types for respoolflash.

use std::io;
use thiserror::Error;

/// Result type for respoolflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for respoolflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The user dismissed the port selection.
    #[error("No serial port selected")]
    NoPortSelected,

    /// The selected port belongs to a USB device that cannot back an ESP32 board.
    #[error("No ESP32 detected: USB vendor {vid:#06x} is not a known ESP32 serial bridge")]
    LikelyWrongDevice {
        /// USB vendor id reported by the port.
        vid: u16,
    },

    /// The loader handshake did not complete within the bound.
    #[error("Timeout: no response from the ESP32 bootloader after {secs} s")]
    SyncTimeout {
        /// Handshake bound in seconds.
        secs: u64,
    },

    /// The handshake succeeded but the chip is not a supported family.
    #[error("Unsupported chip: {}", chip.as_deref().unwrap_or("unknown"))]
    UnsupportedChip {
        /// Chip name reported by the loader, if any.
        chip: Option<String>,
    },

    /// Firmware download answered with a non-success status.
    #[error("Failed to download firmware: {status}")]
    FirmwareDownloadFailed {
        /// HTTP status code.
        status: u16,
    },

    /// Writing the image to flash failed.
    #[error("Flash write failed: {detail}")]
    FlashWriteFailed {
        /// Loader-provided detail.
        detail: String,
    },

    /// Writing the post-flash configuration line failed.
    #[error("Configuration write failed: {0}")]
    ConfigWriteFailed(String),

    /// A reset pulse sequence failed.
    #[error("Reset failed: {0}")]
    ResetFailed(String),

    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The port was used while closed.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Handshake failed for a reason other than the time bound.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Network failure while talking to the firmware server.
    #[error("Network error: {0}")]
    Network(String),

    /// An operation needed a connected board.
    #[error("No serial connection open")]
    NotConnected,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Short generic label shown in place of the detailed message.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::NoPortSelected => "No port selected",
            Self::FirmwareDownloadFailed { .. } => "Failed to download firmware!",
            Self::FlashWriteFailed { .. } => "Flash failed!",
            Self::NotConnected => "Please connect the board first",
            _ => "Failed to connect!",
        }
    }

    /// Whether the error came from a port closed underneath a signal write.
    pub fn is_invalid_state(&self) -> bool {
        match self {
            Self::InvalidState(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotConnected,
            _ => false,
        }
    }

    /// Whether the error is a user cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::NoPortSelected)
    }
}
