//! Connection and flash orchestration.
//!
//! The [`Orchestrator`] drives one board through
//!
//! ```text
//! Idle -> PortChosen -> Identifying -> Connected -> Flashing -> PostConfiguring -> Settled
//!   ^                                                                                 |
//!   +--------------------------------- (Failed from any phase) ----------------------+
//! ```
//!
//! Only two requests start work: [`Orchestrator::request_connection`] and
//! [`Orchestrator::request_flash`]. Both run to completion before returning.
//! Every terminal branch releases the session, so the port is closed and no
//! loader is alive whenever the orchestrator is back at `Idle` or `Failed`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use crate::board::{BoardVariant, SubVariant, VariantSelection};
use crate::classify::{DriverHelp, HelpGate, classify_error, driver_help};
use crate::configure::VariantConfigTransmitter;
use crate::device;
use crate::error::{Error, Result};
use crate::events::{Controls, Event, EventSink, Outcome, ProgressState, progress_percent};
use crate::firmware::{self, FirmwareSource};
use crate::guard::{PortGuard, PortSelector, Session};
use crate::identify::{DeviceIdentifier, HANDSHAKE_TIMEOUT, Identification, bounded_handshake};
use crate::loader::{LoaderFactory, WriteRequest};
use crate::prefs::PreferenceStore;
use crate::reset::{ResetPlan, ResetSignaler};
use crate::timing::Delay;

/// Wait after the loader is released before the first reset.
pub const FLASH_SETTLE: Duration = Duration::from_millis(500);

/// Wait after the first reset for the application firmware to boot.
pub const BOOT_WAIT: Duration = Duration::from_millis(500);

/// Wait after the configuration line before the second reset.
pub const CONFIG_APPLY: Duration = Duration::from_millis(150);

/// How long the success display stays before reverting to ready.
pub const SUCCESS_DISPLAY: Duration = Duration::from_secs(5);

const CHOOSE_PORT_LABEL: &str = "Please choose a serial port";
const DETECTING_LABEL: &str = "Detecting board…";
const INITIALIZING_LABEL: &str = "Initializing, please wait...";
const FLASHING_LABEL: &str = "Flashing firmware...";
const APPLYING_LABEL: &str = "Applying configuration…";
const FLASHED_LABEL: &str = "Flashed successfully!";
const NOT_CONNECTED_LABEL: &str = "Please connect the board first";
const FLASH_FAILED_LABEL: &str = "Flash failed!";

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum State {
    /// Nothing connected.
    Idle,
    /// A port was selected.
    PortChosen,
    /// Handshake running.
    Identifying,
    /// Board identified, ready to flash.
    Connected,
    /// Image being written.
    Flashing,
    /// Reset / configure / reset.
    PostConfiguring,
    /// Flash completed.
    Settled,
    /// Last request failed.
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PortChosen => "port chosen",
            Self::Identifying => "identifying",
            Self::Connected => "connected",
            Self::Flashing => "flashing",
            Self::PostConfiguring => "post-configuring",
            Self::Settled => "settled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Process-lifetime state shared by all sessions.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorContext {
    help: HelpGate,
    selection: VariantSelection,
    last_error: Option<String>,
}

impl OrchestratorContext {
    /// Context with the selection remembered in `prefs`.
    pub fn new(prefs: &dyn PreferenceStore) -> Self {
        Self {
            selection: VariantSelection::load(prefs),
            ..Self::default()
        }
    }

    /// Current board/sub-variant selection.
    pub fn selection(&self) -> VariantSelection {
        self.selection
    }

    /// Whether driver help was already shown automatically.
    pub fn help_shown(&self) -> bool {
        self.help.was_shown()
    }
}

/// External capabilities the orchestrator drives.
pub struct Collaborators {
    /// Platform port selection.
    pub selector: Box<dyn PortSelector>,
    /// Flash loader construction.
    pub loaders: Box<dyn LoaderFactory>,
    /// Firmware distribution.
    pub firmware: Box<dyn FirmwareSource>,
    /// Preference store.
    pub prefs: Box<dyn PreferenceStore>,
    /// Presentation events.
    pub events: Box<dyn EventSink>,
    /// Waits.
    pub delay: Arc<dyn Delay>,
}

/// The connection/flash state machine.
pub struct Orchestrator {
    ctx: OrchestratorContext,
    state: State,
    session: Option<Session>,
    selector: Box<dyn PortSelector>,
    loaders: Box<dyn LoaderFactory>,
    firmware: Box<dyn FirmwareSource>,
    prefs: Box<dyn PreferenceStore>,
    events: Box<dyn EventSink>,
    delay: Arc<dyn Delay>,
    reset: ResetSignaler,
    transmitter: VariantConfigTransmitter,
    handshake_timeout: Duration,
    success_display: Duration,
}

impl Orchestrator {
    /// Create an idle orchestrator.
    pub fn new(collaborators: Collaborators) -> Self {
        let Collaborators {
            selector,
            loaders,
            firmware,
            prefs,
            events,
            delay,
        } = collaborators;

        Self {
            ctx: OrchestratorContext::new(prefs.as_ref()),
            state: State::Idle,
            session: None,
            selector,
            loaders,
            firmware,
            prefs,
            events,
            reset: ResetSignaler::new(Arc::clone(&delay)),
            transmitter: VariantConfigTransmitter::new(Arc::clone(&delay)),
            delay,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            success_display: SUCCESS_DISPLAY,
        }
    }

    /// Override the handshake bound.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Override how long the success display is held.
    #[must_use]
    pub fn with_success_display(mut self, duration: Duration) -> Self {
        self.success_display = duration;
        self
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Process-lifetime context.
    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    /// Active session, if a board is connected.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The preference store.
    pub fn preferences(&self) -> &dyn PreferenceStore {
        self.prefs.as_ref()
    }

    /// Detailed message of the last failure.
    pub fn last_error_detail(&self) -> Option<&str> {
        self.ctx.last_error.as_deref()
    }

    /// Select a board explicitly. Persisted; applies to the active session.
    pub fn set_board_variant(&mut self, board: BoardVariant) {
        if self.ctx.selection.set_board(board, self.prefs.as_mut()) {
            info!("Board set to {board}");
        }
        self.sync_session_selection();
    }

    /// Select a sub-variant explicitly. Persisted; applies to the active session.
    pub fn set_sub_variant(&mut self, sub: SubVariant) {
        if self.ctx.selection.set_sub(sub, self.prefs.as_mut()) {
            info!("Variant set to {sub}");
        }
        self.sync_session_selection();
    }

    /// Driver help on demand. Does not count against the automatic showing.
    pub fn driver_help(&mut self) -> DriverHelp {
        let help = driver_help();
        self.emit(Event::DriverHelp(help));
        help
    }

    /// Look up and publish the latest firmware version.
    pub fn load_firmware_version(&mut self) -> String {
        let version = firmware::load_firmware_version(self.firmware.as_ref());
        self.emit(Event::FirmwareVersion(version.clone()));
        version
    }

    /// Drop the active session and return to idle.
    pub fn disconnect(&mut self) {
        self.teardown();
        self.to_idle();
    }

    /// Select a port and identify the board behind it.
    ///
    /// Any previous session is released first. `NoPortSelected` is returned
    /// when the user cancels; it is not reported as a failure.
    pub fn request_connection(&mut self) -> Result<Identification> {
        self.teardown();
        self.emit_controls(Controls::BUSY);
        self.emit_progress(ProgressState::new(0, CHOOSE_PORT_LABEL));

        let mut session = match PortGuard::acquire(self.selector.as_mut(), self.ctx.selection) {
            Ok(session) => session,
            Err(e) if e.is_cancellation() => {
                info!("Port selection cancelled");
                self.to_idle();
                return Err(e);
            },
            Err(e) => return Err(self.fail(e, connect_failure_label)),
        };
        self.set_state(State::PortChosen);

        if let Err(e) = device::screen_vendor(session.vendor_id()) {
            PortGuard::release(&mut session);
            return Err(self.fail(e, connect_failure_label));
        }

        self.set_state(State::Identifying);
        self.emit_progress(ProgressState::new(0, DETECTING_LABEL));

        let identified = DeviceIdentifier::new(self.loaders.as_ref())
            .with_timeout(self.handshake_timeout)
            .identify(&mut session);
        let id = match identified {
            Ok(id) => id,
            Err(e) => {
                drop(session);
                return Err(self.fail(e, connect_failure_label));
            },
        };

        id.adopt(&mut self.ctx.selection, self.prefs.as_mut());
        session.apply_selection(self.ctx.selection);
        // the flash request binds its own loader
        session.detach_loader();
        self.session = Some(session);

        self.set_state(State::Connected);
        self.emit(Event::Connected {
            chip_family: id.chip_family.clone(),
            variant: id.inferred_variant,
        });
        self.emit_progress(ProgressState::new(
            0,
            format!("Connected successfully! ({})", id.inferred_variant.label()),
        ));
        self.emit_controls(Controls::CONNECTED);
        Ok(id)
    }

    /// Flash the connected board and apply the sub-variant configuration.
    pub fn request_flash(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            debug!("Flash requested without a connected board");
            self.emit_progress(ProgressState::error(NOT_CONNECTED_LABEL));
            self.emit_controls(Controls::IDLE);
            return Err(Error::NotConnected);
        };

        self.emit_controls(Controls::BUSY);
        self.emit_progress(ProgressState::new(0, INITIALIZING_LABEL));
        self.set_state(State::Flashing);

        let flashed = self.flash_session(&mut session);
        PortGuard::release(&mut session);
        drop(session);

        if let Err(e) = flashed {
            return Err(self.fail(e, flash_failure_label));
        }

        self.set_state(State::Settled);
        info!("Flash complete");
        self.emit_progress(ProgressState::new(100, FLASHED_LABEL));
        self.emit(Event::Finished(Outcome::Success));
        self.delay.sleep(self.success_display);
        self.to_idle();
        Ok(())
    }

    fn flash_session(&mut self, session: &mut Session) -> Result<()> {
        let variant = session.variant();
        let sub = session.sub_variant();
        info!(
            "Flashing {variant} ({sub}) on {} at {} baud",
            session.port_name(),
            variant.baud_rate()
        );

        let loader = session.attach_loader(self.loaders.as_ref(), variant.baud_rate())?;
        bounded_handshake(loader, self.handshake_timeout)?;

        let image = self.firmware.fetch_image(variant)?;
        debug!("Writing {} bytes", image.len());

        let events = &mut self.events;
        let mut last = None;
        loader.write_image(&WriteRequest::application(&image), &mut |written: usize, total: usize| {
            let percent = progress_percent(written, total);
            if last != Some(percent) {
                last = Some(percent);
                events.emit(Event::Progress(ProgressState::new(percent, FLASHING_LABEL)));
            }
        })?;

        session.detach_loader();
        self.set_state(State::PostConfiguring);
        self.post_configure(session, variant.reset_strategy().into(), sub);
        Ok(())
    }

    /// Reset into the application, send the configuration, reset again.
    fn post_configure(&mut self, session: &mut Session, plan: ResetPlan, sub: SubVariant) {
        self.delay.sleep(FLASH_SETTLE);
        self.emit_progress(ProgressState::new(100, APPLYING_LABEL));

        let Some(port) = session.port_mut() else {
            error!("Port lost before post-flash configuration");
            return;
        };
        self.reset.reset(port, plan);
        self.delay.sleep(BOOT_WAIT);
        self.transmitter.send(port, sub);
        self.delay.sleep(CONFIG_APPLY);
        self.reset.reset(port, plan);
    }

    fn fail(&mut self, err: Error, label: fn(&Error) -> &'static str) -> Error {
        self.teardown();

        let label = label(&err);
        let detail = err.to_string();
        error!("{label} {detail}");
        self.ctx.last_error = Some(detail.clone());

        self.set_state(State::Failed);
        self.emit_progress(ProgressState::error(label));
        self.emit(Event::Finished(Outcome::Failure {
            label: label.to_string(),
            detail,
        }));
        if self.ctx.help.offer(classify_error(&err)) {
            self.emit(Event::DriverHelp(driver_help()));
        }
        self.emit_controls(Controls::IDLE);
        err
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Releasing session on {}", session.port_name());
            PortGuard::release(&mut session);
        }
    }

    fn to_idle(&mut self) {
        self.set_state(State::Idle);
        self.emit_progress(ProgressState::ready());
        self.emit_controls(Controls::IDLE);
    }

    fn sync_session_selection(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.apply_selection(self.ctx.selection);
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("State {} -> {state}", self.state);
            self.state = state;
            self.emit(Event::State(state));
        }
    }

    fn emit_progress(&mut self, progress: ProgressState) {
        self.emit(Event::Progress(progress));
    }

    fn emit_controls(&mut self, controls: Controls) {
        self.emit(Event::Controls(controls));
    }

    fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }
}

fn connect_failure_label(err: &Error) -> &'static str {
    err.kind_label()
}

fn flash_failure_label(err: &Error) -> &'static str {
    match err {
        Error::FirmwareDownloadFailed { .. } => err.kind_label(),
        _ => FLASH_FAILED_LABEL,
    }
}
