//! Hardware reset via the serial control lines.
//!
//! Boards are reset by pulsing DTR/RTS, which the auto-reset circuit wires
//! to the chip's EN and boot strap pins. Two wirings exist in the field:
//!
//! - **EN only**: RTS drives EN through a transistor, DTR is left alone.
//!   Used by the DevKit behind a USB-UART bridge.
//! - **DTR/RTS**: the classic two-transistor circuit. Used by native-USB
//!   boards.
//!
//! A reset is always best-effort. The signaler reopens a closed port once
//! when a signal write reports an invalid state, and a failed pulse is
//! logged, never propagated.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::port::{DEFAULT_BAUD, Port};
use crate::timing::Delay;

/// Settle time after (re)opening a port before pulsing it.
pub const OPEN_SETTLE: Duration = Duration::from_millis(150);

/// One step of a reset pulse: set both lines, then hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseStep {
    /// DTR level.
    pub dtr: bool,
    /// RTS level.
    pub rts: bool,
    /// How long the levels are held.
    pub hold: Duration,
}

const fn step(dtr: bool, rts: bool, hold_ms: u64) -> PulseStep {
    PulseStep {
        dtr,
        rts,
        hold: Duration::from_millis(hold_ms),
    }
}

const EN_ONLY_PULSE: [PulseStep; 3] = [
    step(false, false, 60),
    step(false, true, 140),
    step(false, false, 180),
];

const DTR_RTS_PULSE: [PulseStep; 3] = [
    step(false, true, 120),
    step(true, false, 120),
    step(false, false, 120),
];

/// Control-line pulse sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStrategy {
    /// Pulse RTS alone (EN line only).
    EnOnly,
    /// Alternate RTS and DTR (classic auto-reset circuit).
    DtrRts,
}

impl ResetStrategy {
    /// The pulse steps of this strategy.
    pub fn steps(&self) -> &'static [PulseStep] {
        match self {
            Self::EnOnly => &EN_ONLY_PULSE,
            Self::DtrRts => &DTR_RTS_PULSE,
        }
    }
}

impl fmt::Display for ResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnOnly => f.write_str("en-only"),
            Self::DtrRts => f.write_str("dtr-rts"),
        }
    }
}

/// Which strategy a reset uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPlan {
    /// Always the given strategy.
    Pinned(ResetStrategy),
    /// EN-only first, DTR/RTS when that fails.
    Auto,
}

impl From<ResetStrategy> for ResetPlan {
    fn from(strategy: ResetStrategy) -> Self {
        Self::Pinned(strategy)
    }
}

/// Issues reset pulses on a port.
#[derive(Clone)]
pub struct ResetSignaler {
    delay: Arc<dyn Delay>,
}

impl ResetSignaler {
    /// Create a signaler that waits through `delay`.
    pub fn new(delay: Arc<dyn Delay>) -> Self {
        Self { delay }
    }

    /// Reset the board. Never fails; problems are logged.
    pub fn reset(&self, port: &mut dyn Port, plan: ResetPlan) {
        if !port.supports_control_lines() {
            debug!("{} has no control lines, skipping reset", port.name());
            return;
        }

        match plan {
            ResetPlan::Pinned(strategy) => {
                if let Err(e) = self.try_reset(port, strategy) {
                    warn!("Hardware reset ({strategy}) failed: {e}");
                }
            },
            ResetPlan::Auto => {
                if let Err(e) = self.try_reset(port, ResetStrategy::EnOnly) {
                    debug!("EN-only reset failed ({e}), falling back to DTR/RTS");
                    if let Err(e) = self.try_reset(port, ResetStrategy::DtrRts) {
                        warn!("Hardware reset failed: {e}");
                    }
                }
            },
        }
    }

    /// Pulse `strategy` once, reopening the port and retrying once if the
    /// port turned out to be closed.
    pub fn try_reset(&self, port: &mut dyn Port, strategy: ResetStrategy) -> Result<()> {
        self.ensure_open(port);

        match self.pulse(port, strategy) {
            Ok(()) => Ok(()),
            Err(e) if e.is_invalid_state() => {
                debug!("Port closed during reset ({e}), reopening once");
                self.ensure_open(port);
                self.pulse(port, strategy)
                    .map_err(|e| Error::ResetFailed(e.to_string()))
            },
            Err(e) => Err(Error::ResetFailed(e.to_string())),
        }
    }

    fn ensure_open(&self, port: &mut dyn Port) {
        if port.is_open() {
            return;
        }
        match port.open(DEFAULT_BAUD) {
            Ok(()) => self.delay.sleep(OPEN_SETTLE),
            Err(e) => debug!("Could not open {} for reset: {e}", port.name()),
        }
    }

    fn pulse(&self, port: &mut dyn Port, strategy: ResetStrategy) -> Result<()> {
        for step in strategy.steps() {
            port.set_signals(step.dtr, step.rts)?;
            self.delay.sleep(step.hold);
        }
        Ok(())
    }
}
