//! # respoolflash
//!
//! Connect to, identify and flash Respooler ESP32 boards.
//!
//! This crate is the orchestration core of the Respooler flasher:
//!
//! - serial port acquisition and guaranteed release
//! - bounded loader handshake and chip identification
//! - board variant selection (firmware image, baud rate, reset wiring)
//! - firmware write with progress reporting
//! - post-flash reset / configure / reset sequence
//! - failure classification with one-shot driver help
//!
//! The ROM loader protocol itself, the firmware server, the preference store
//! and the presentation layer are capabilities supplied by the embedding
//! application through the traits in [`loader`], [`firmware`], [`prefs`],
//! [`guard`] and [`events`].
//!
//! ## Supported Boards
//!
//! - ESP32 DevKit (ESP32-WROOM-32 behind a CP210x/CH340 bridge)
//! - Respooler Control Board V4 (ESP32-S3, native USB)
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `http` (default): firmware download via `ureq`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use respoolflash::{
//!     Collaborators, Event, HttpFirmwareSource, LoaderFactory, MemoryPreferences, Orchestrator,
//!     PortSelector, ThreadDelay,
//! };
//!
//! fn run(
//!     selector: Box<dyn PortSelector>,
//!     loaders: Box<dyn LoaderFactory>,
//! ) -> respoolflash::Result<()> {
//!     let mut orchestrator = Orchestrator::new(Collaborators {
//!         selector,
//!         loaders,
//!         firmware: Box::new(HttpFirmwareSource::default()),
//!         prefs: Box::new(MemoryPreferences::default()),
//!         events: Box::new(|event: Event| println!("{event:?}")),
//!         delay: Arc::new(ThreadDelay),
//!     });
//!
//!     let id = orchestrator.request_connection()?;
//!     println!("Found {} ({})", id.chip_family, id.inferred_variant);
//!     orchestrator.request_flash()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod board;
pub mod classify;
pub mod configure;
pub mod device;
pub mod error;
pub mod events;
pub mod firmware;
pub mod guard;
pub mod host;
pub mod identify;
pub mod loader;
pub mod orchestrator;
pub mod port;
pub mod prefs;
pub mod reset;
pub mod timing;

#[cfg(test)]
mod mock;

// Re-exports for convenience
#[cfg(feature = "http")]
pub use firmware::HttpFirmwareSource;
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    board::{BoardVariant, ChipFamily, SubVariant, VariantSelection},
    classify::{Classification, DriverHelp, DriverLink, HelpGate, classify, driver_help},
    configure::{VariantConfigTransmitter, config_line},
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    events::{Controls, Event, EventSink, Outcome, ProgressState, progress_percent},
    firmware::FirmwareSource,
    guard::{PortGuard, PortSelector, Session},
    host::{auto_detect_port, discover_esp_ports, discover_ports},
    identify::{DeviceIdentifier, Identification},
    loader::{ChipInfo, FlashLoader, LoaderFactory, WriteRequest},
    orchestrator::{Collaborators, Orchestrator, OrchestratorContext, State},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    prefs::{MemoryPreferences, PreferenceStore},
    reset::{ResetPlan, ResetSignaler, ResetStrategy},
    timing::{Deadline, Delay, ThreadDelay},
};
