//! Events published to the presentation layer.

use crate::board::BoardVariant;
use crate::classify::DriverHelp;
use crate::orchestrator::State;

/// Label shown while no board is connected.
pub const READY_LABEL: &str = "Ready for connection";

/// Progress as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressState {
    /// Completion, 0..=100.
    pub percent: u8,
    /// Phase label.
    pub label: String,
    /// Whether the label reports a failure.
    pub is_error: bool,
}

impl ProgressState {
    /// Regular progress.
    pub fn new(percent: u8, label: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            label: label.into(),
            is_error: false,
        }
    }

    /// Failure label at 0 %.
    pub fn error(label: impl Into<String>) -> Self {
        Self {
            percent: 0,
            label: label.into(),
            is_error: true,
        }
    }

    /// The neutral idle display.
    pub fn ready() -> Self {
        Self::new(0, READY_LABEL)
    }
}

/// `round(written / total * 100)`, 0 when `total` is 0, capped at 100.
pub fn progress_percent(written: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let written = written.min(total) as u128;
    let total = total as u128;
    let percent = (written * 100 + total / 2) / total;
    u8::try_from(percent.min(100)).unwrap_or(100)
}

/// Which user actions are currently valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    /// Port selection / connect.
    pub connect: bool,
    /// Flash trigger.
    pub flash: bool,
    /// Board and sub-variant pickers.
    pub variant: bool,
}

impl Controls {
    /// Nothing connected: only connecting makes sense.
    pub const IDLE: Self = Self {
        connect: true,
        flash: false,
        variant: true,
    };

    /// A phase is running.
    pub const BUSY: Self = Self {
        connect: false,
        flash: false,
        variant: false,
    };

    /// A board is identified and ready to flash.
    pub const CONNECTED: Self = Self {
        connect: false,
        flash: true,
        variant: true,
    };
}

/// Terminal result of a connection or flash request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Completed.
    Success,
    /// Failed; `label` is the short message, `detail` the full one.
    Failure {
        /// Short generic label.
        label: String,
        /// Detailed message, shown on demand.
        detail: String,
    },
}

/// Something the presentation layer should reflect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Orchestrator state changed.
    State(State),
    /// Progress display changed.
    Progress(ProgressState),
    /// Enabled actions changed.
    Controls(Controls),
    /// A board was identified.
    Connected {
        /// Upper-cased chip name.
        chip_family: String,
        /// Variant now in effect.
        variant: BoardVariant,
    },
    /// A request reached its terminal state.
    Finished(Outcome),
    /// Show driver help.
    DriverHelp(DriverHelp),
    /// Latest published firmware version.
    FirmwareVersion(String),
}

/// Receives presentation events.
pub trait EventSink: Send {
    /// Handle one event.
    fn emit(&mut self, event: Event);
}

impl<F> EventSink for F
where
    F: FnMut(Event) + Send,
{
    fn emit(&mut self, event: Event) {
        self(event);
    }
}
