//! Device discovery and USB bridge classification.
//!
//! Respooler boards reach the host either through the ESP32-S3's native USB
//! peripheral or through a USB-UART bridge soldered onto a DevKit. The vendor
//! table below is shared by port discovery and by the pre-handshake vendor
//! screen in the orchestrator.

use crate::error::{Error, Result};
use crate::port::PortInfo;

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB bridge/device kinds found on ESP32 boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Espressif native USB (USB-Serial/JTAG, TinyUSB CDC).
    Espressif,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// WCH CH340/CH341/CH9102 USB-to-Serial converter.
    Ch34x,
    /// FTDI FT232/FT2232 USB-to-Serial converter.
    Ftdi,
    /// Unknown device.
    Unknown,
}

/// USB vendor ids of serial bridges used with the supported chip family.
const KNOWN_VENDORS: &[(u16, DeviceKind)] = &[
    (0x303A, DeviceKind::Espressif),
    (0x10C4, DeviceKind::Cp210x),
    (0x1A86, DeviceKind::Ch34x),
    (0x0403, DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a USB vendor id.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        KNOWN_VENDORS
            .iter()
            .find(|(known, _)| *known == vid)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Espressif => "Espressif USB",
            Self::Cp210x => "CP210x",
            Self::Ch34x => "CH34x/CH9102",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Native USB boards answer at the high baud rate and are preferred.
    pub fn is_native_usb(&self) -> bool {
        matches!(self, Self::Espressif)
    }
}

/// Reject ports whose USB vendor is known and not an ESP32 serial bridge.
///
/// Ports without a vendor id (built-in UARTs, transports that cannot report
/// one) pass: only a positive mismatch is treated as the wrong device.
pub fn screen_vendor(vid: Option<u16>) -> Result<()> {
    match vid {
        Some(vid) if !DeviceKind::from_vid(vid).is_known() => {
            Err(Error::LikelyWrongDevice { vid })
        },
        _ => Ok(()),
    }
}

/// Discovered device endpoint information.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Host-reported port information.
    pub info: PortInfo,
    /// Classified device kind.
    pub device: DeviceKind,
}

impl DetectedPort {
    /// Classify host port information.
    pub fn from_info(info: PortInfo) -> Self {
        let device = info.vid.map_or(DeviceKind::Unknown, DeviceKind::from_vid);
        Self { info, device }
    }

    /// Endpoint name/path.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Check if this endpoint is likely an ESP32 board.
    pub fn is_likely_esp(&self) -> bool {
        self.device.is_known()
    }
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                let detected = DetectedPort::from_info(info);
                if let (Some(vid), Some(pid)) = (detected.info.vid, detected.info.pid) {
                    trace!(
                        "Found USB port: {} (VID: {vid:04X}, PID: {pid:04X}, Device: {:?})",
                        detected.info.name, detected.device
                    );
                }
                detected
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect all available endpoints (no native serial support compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Detect endpoints that are likely ESP32 boards.
pub fn detect_esp_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_esp)
        .collect()
}

/// Pick the best candidate from a list of endpoints.
///
/// Native USB first, then any known bridge. Unknown ports are never picked
/// automatically.
pub fn best_candidate(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    ports
        .iter()
        .find(|p| p.device.is_native_usb())
        .or_else(|| ports.iter().find(|p| p.device.is_known()))
}

/// Auto-detect a single ESP32 endpoint.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();

    let port = best_candidate(&ports).ok_or(Error::NoPortSelected)?;
    info!(
        "Auto-detected {} port: {}",
        port.device.name(),
        port.info.name
    );
    Ok(port.clone())
}

/// Auto-detect a single ESP32 endpoint (no native serial support compiled in).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Config(
        "Port auto-detection needs the `native` feature".to_string(),
    ))
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .info
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.info.name, device_info, product_info)
        })
        .collect()
}
