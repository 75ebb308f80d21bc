//! Port resource guard and the connection session.
//!
//! A [`Session`] exclusively owns the selected port and, while one is
//! active, the loader bound to it. The loader holds the port for its whole
//! lifetime, so the session stores one or the other, never both. Releasing
//! a session disconnects the loader, takes the port back and closes it;
//! dropping a session releases it as well, so no path out of the
//! orchestrator can leave a handle open.

use log::{debug, info, warn};

use crate::board::{BoardVariant, SubVariant, VariantSelection};
use crate::error::{Error, Result};
use crate::loader::{FlashLoader, LoaderFactory};
use crate::port::Port;

/// Platform port selection.
pub trait PortSelector: Send {
    /// Ask for a port. `Ok(None)` means the user dismissed the selection.
    fn select(&mut self) -> Result<Option<Box<dyn Port>>>;
}

enum Link {
    Port(Box<dyn Port>),
    Loader(Box<dyn FlashLoader>),
}

/// State bound to one physical connection attempt.
pub struct Session {
    link: Option<Link>,
    port_name: String,
    vendor_id: Option<u16>,
    chip_family: Option<String>,
    variant: BoardVariant,
    sub_variant: SubVariant,
}

impl Session {
    /// Start a session on `port` with the remembered selection.
    pub fn new(port: Box<dyn Port>, selection: VariantSelection) -> Self {
        Self {
            port_name: port.name().to_string(),
            vendor_id: port.usb_vendor_id(),
            link: Some(Link::Port(port)),
            chip_family: None,
            variant: selection.board,
            sub_variant: selection.sub,
        }
    }

    /// Name of the selected port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// USB vendor id of the selected port, if the host reported one.
    pub fn vendor_id(&self) -> Option<u16> {
        self.vendor_id
    }

    /// Chip family found by the last identification.
    pub fn chip_family(&self) -> Option<&str> {
        self.chip_family.as_deref()
    }

    /// Board variant in effect for this session.
    pub fn variant(&self) -> BoardVariant {
        self.variant
    }

    /// Sub-variant in effect for this session.
    pub fn sub_variant(&self) -> SubVariant {
        self.sub_variant
    }

    pub(crate) fn record_identification(&mut self, chip_family: &str, variant: BoardVariant) {
        self.chip_family = Some(chip_family.to_string());
        self.variant = variant;
    }

    pub(crate) fn apply_selection(&mut self, selection: VariantSelection) {
        self.variant = selection.board;
        self.sub_variant = selection.sub;
    }

    /// Whether the session still holds its port (directly or via a loader).
    pub fn is_held(&self) -> bool {
        self.link.is_some()
    }

    /// Whether a loader is currently bound to the port.
    pub fn has_loader(&self) -> bool {
        matches!(self.link, Some(Link::Loader(_)))
    }

    /// The port, when no loader holds it.
    pub fn port_mut(&mut self) -> Option<&mut dyn Port> {
        match &mut self.link {
            Some(Link::Port(port)) => Some(port.as_mut()),
            _ => None,
        }
    }

    /// Bind a freshly constructed loader to the port.
    ///
    /// Any loader still bound is disconnected first; loaders are never
    /// reused across handshake attempts.
    pub fn attach_loader(
        &mut self,
        factory: &dyn LoaderFactory,
        baud_rate: u32,
    ) -> Result<&mut dyn FlashLoader> {
        self.detach_loader();

        let Some(Link::Port(port)) = self.link.take() else {
            return Err(Error::NotConnected);
        };

        debug!("Binding loader to {} at {baud_rate} baud", self.port_name);
        let loader = self
            .link
            .insert(Link::Loader(factory.construct(port, baud_rate)));
        match loader {
            Link::Loader(loader) => Ok(loader.as_mut()),
            Link::Port(_) => Err(Error::NotConnected),
        }
    }

    /// Disconnect the bound loader and keep its port in the session.
    ///
    /// The port is handed back as the loader left it; it is not closed.
    pub fn detach_loader(&mut self) {
        match self.link.take() {
            Some(Link::Loader(mut loader)) => {
                if let Err(e) = loader.disconnect() {
                    warn!("Failed to disconnect loader on {}: {e}", self.port_name);
                }
                self.link = Some(Link::Port(loader.into_port()));
            },
            link => self.link = link,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        PortGuard::release(self);
    }
}

/// Acquires ports into sessions and releases them again.
pub struct PortGuard;

impl PortGuard {
    /// Ask the platform for a port and start a session on it.
    pub fn acquire(
        selector: &mut dyn PortSelector,
        selection: VariantSelection,
    ) -> Result<Session> {
        let port = selector.select()?.ok_or(Error::NoPortSelected)?;
        info!("Selected port {}", port.name());
        Ok(Session::new(port, selection))
    }

    /// Release everything the session holds.
    ///
    /// Best-effort and idempotent: disconnects the loader, closes the port
    /// if it is open, and only logs failures along the way.
    pub fn release(session: &mut Session) {
        let port = match session.link.take() {
            None => return,
            Some(Link::Port(port)) => port,
            Some(Link::Loader(mut loader)) => {
                if let Err(e) = loader.disconnect() {
                    warn!("Failed to disconnect loader on {}: {e}", session.port_name);
                }
                loader.into_port()
            },
        };
        close_port(port, &session.port_name);
    }
}

fn close_port(mut port: Box<dyn Port>, name: &str) {
    if !port.is_open() {
        return;
    }
    match port.close() {
        Ok(()) => debug!("Released {name}"),
        Err(e) => warn!("Failed to close serial port {name}: {e}"),
    }
}
