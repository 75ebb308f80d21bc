//! Flash loader capability.
//!
//! The loader speaks the ROM bootloader protocol: it synchronises with the
//! chip, reports what it found and writes an image to flash. This crate only
//! consumes that capability. A loader owns the port it was constructed with
//! for as long as it lives and hands it back through
//! [`FlashLoader::into_port`].

use crate::error::Result;
use crate::port::Port;
use crate::timing::Deadline;

/// Flash address the application image is written to.
pub const IMAGE_BASE_ADDRESS: u32 = 0x0;

/// What the loader learned from the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipInfo {
    /// Chip name as reported by the loader (e.g. "ESP32-S3"), if any.
    pub chip_name: Option<String>,
}

/// SPI flash mode written into the image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashMode {
    /// Keep whatever the image header already says.
    #[default]
    Keep,
    /// Quad I/O.
    Qio,
    /// Dual I/O.
    Dio,
}

impl FlashMode {
    /// esptool-style argument value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Qio => "qio",
            Self::Dio => "dio",
        }
    }
}

/// SPI flash frequency written into the image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashFrequency {
    /// Keep whatever the image header already says.
    #[default]
    Keep,
    /// 40 MHz.
    Mhz40,
    /// 80 MHz.
    Mhz80,
}

impl FlashFrequency {
    /// esptool-style argument value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Mhz40 => "40m",
            Self::Mhz80 => "80m",
        }
    }
}

/// Assumed flash chip size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashSize {
    /// 4 MiB, fitted on every supported board.
    #[default]
    Mb4,
    /// 8 MiB.
    Mb8,
    /// 16 MiB.
    Mb16,
}

impl FlashSize {
    /// esptool-style argument value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mb4 => "4MB",
            Self::Mb8 => "8MB",
            Self::Mb16 => "16MB",
        }
    }
}

/// A single image write.
#[derive(Debug, Clone)]
pub struct WriteRequest<'a> {
    /// Flash address.
    pub address: u32,
    /// Image bytes.
    pub data: &'a [u8],
    /// Flash mode.
    pub flash_mode: FlashMode,
    /// Flash frequency.
    pub flash_freq: FlashFrequency,
    /// Flash size.
    pub flash_size: FlashSize,
    /// Erase the whole chip before writing.
    pub erase_all: bool,
    /// Compress the image on the wire.
    pub compress: bool,
}

impl<'a> WriteRequest<'a> {
    /// The application image write used by the orchestrator: base address,
    /// keep flash parameters, 4 MiB, no full erase, compressed.
    pub fn application(data: &'a [u8]) -> Self {
        Self {
            address: IMAGE_BASE_ADDRESS,
            data,
            flash_mode: FlashMode::Keep,
            flash_freq: FlashFrequency::Keep,
            flash_size: FlashSize::Mb4,
            erase_all: false,
            compress: true,
        }
    }
}

/// An active loader session bound to one port.
pub trait FlashLoader: Send {
    /// Synchronise with the ROM loader and identify the chip.
    ///
    /// Implementations must stop all I/O and return
    /// [`crate::Error::Timeout`] once `deadline` expires.
    fn handshake(&mut self, deadline: &Deadline) -> Result<ChipInfo>;

    /// Write an image, reporting `(bytes_written, bytes_total)`.
    fn write_image(
        &mut self,
        request: &WriteRequest<'_>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()>;

    /// End the loader session.
    fn disconnect(&mut self) -> Result<()>;

    /// Give the port back. The port may be open or closed.
    fn into_port(self: Box<Self>) -> Box<dyn Port>;
}

/// Builds a fresh loader for every handshake attempt.
pub trait LoaderFactory: Send {
    /// Bind a new loader to `port` at `baud_rate`.
    fn construct(&self, port: Box<dyn Port>, baud_rate: u32) -> Box<dyn FlashLoader>;
}
