//! Chip identification over the loader handshake.
//!
//! A fresh loader is bound to the session port, the ROM loader is
//! synchronised within [`HANDSHAKE_TIMEOUT`], and the reported chip name is
//! mapped to a board variant. Any failure releases the session's port before
//! the error is returned.

use std::time::Duration;

use log::{debug, info, warn};

use crate::board::{BoardVariant, VariantSelection};
use crate::error::{Error, Result};
use crate::guard::{PortGuard, Session};
use crate::loader::{ChipInfo, FlashLoader, LoaderFactory};
use crate::prefs::PreferenceStore;
use crate::timing::Deadline;

/// Upper bound on the loader handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Token every supported chip name contains.
pub const FAMILY_TOKEN: &str = "ESP32";

/// Suffixes of ESP32 siblings that are not the plain ESP32.
const SIBLING_MARKERS: &[&str] = &["S2", "S3", "C2", "C3", "C5", "C6", "H2", "P4"];

/// Result of a successful identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    /// Upper-cased chip name as reported by the loader.
    pub chip_family: String,
    /// Board variant implied by the chip.
    pub inferred_variant: BoardVariant,
}

impl Identification {
    /// Make the inferred variant the user's selection.
    ///
    /// Persists only when it differs from the current selection; returns
    /// whether it did.
    pub fn adopt(&self, selection: &mut VariantSelection, prefs: &mut dyn PreferenceStore) -> bool {
        let changed = selection.set_board(self.inferred_variant, prefs);
        if changed {
            info!(
                "Detected {}, switching board to {}",
                self.chip_family, self.inferred_variant
            );
        }
        changed
    }
}

/// Normalise a loader-reported chip name.
pub fn normalize_chip_name(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Map an upper-cased chip name to the board that carries it.
///
/// Plain ESP32 means the DevKit, an S3 means the Control Board. Every other
/// sibling, and anything that is not an ESP32 at all, is unsupported.
pub fn infer_variant(chip: &str) -> Option<BoardVariant> {
    if !chip.contains(FAMILY_TOKEN) {
        return None;
    }
    let plain = chip == FAMILY_TOKEN || !SIBLING_MARKERS.iter().any(|m| chip.contains(m));
    if plain {
        Some(BoardVariant::DevKit)
    } else if chip.contains("S3") {
        Some(BoardVariant::ControlBoardV4)
    } else {
        None
    }
}

/// Run a loader handshake bounded by `timeout`.
///
/// A loader timeout, any failure after expiry and an answer that only
/// arrives after expiry all become [`Error::SyncTimeout`].
pub fn bounded_handshake(loader: &mut dyn FlashLoader, timeout: Duration) -> Result<ChipInfo> {
    let expired = || Error::SyncTimeout {
        secs: timeout.as_secs(),
    };
    let deadline = Deadline::after(timeout);

    match loader.handshake(&deadline) {
        // an answer after the bound is no answer
        Ok(_) if deadline.expired() => Err(expired()),
        Ok(info) => Ok(info),
        Err(Error::Timeout(detail)) => {
            debug!("Handshake timed out: {detail}");
            Err(expired())
        },
        Err(_) if deadline.expired() => Err(expired()),
        Err(e) => Err(e),
    }
}

/// Runs the bounded handshake and classifies the chip.
pub struct DeviceIdentifier<'a> {
    loaders: &'a dyn LoaderFactory,
    timeout: Duration,
}

impl<'a> DeviceIdentifier<'a> {
    /// Identifier using `loaders` with the standard handshake bound.
    pub fn new(loaders: &'a dyn LoaderFactory) -> Self {
        Self {
            loaders,
            timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the handshake bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identify the chip behind the session port.
    ///
    /// On success the loader stays bound to the session and the session
    /// records the chip and the inferred variant. On failure the session's
    /// port is released.
    pub fn identify(&self, session: &mut Session) -> Result<Identification> {
        let baud_rate = session.variant().baud_rate();
        match self.handshake(session, baud_rate) {
            Ok(id) => {
                session.record_identification(&id.chip_family, id.inferred_variant);
                info!("Identified {} on {}", id.chip_family, session.port_name());
                Ok(id)
            },
            Err(e) => {
                warn!("Identification on {} failed: {e}", session.port_name());
                PortGuard::release(session);
                Err(e)
            },
        }
    }

    fn handshake(&self, session: &mut Session, baud_rate: u32) -> Result<Identification> {
        let loader = session.attach_loader(self.loaders, baud_rate)?;
        let info = bounded_handshake(loader, self.timeout)?;

        let chip = info
            .chip_name
            .as_deref()
            .map(normalize_chip_name)
            .filter(|c| !c.is_empty())
            .ok_or(Error::UnsupportedChip { chip: None })?;

        let inferred_variant = infer_variant(&chip).ok_or_else(|| Error::UnsupportedChip {
            chip: Some(chip.clone()),
        })?;

        Ok(Identification {
            chip_family: chip,
            inferred_variant,
        })
    }
}
