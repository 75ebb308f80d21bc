//! Interactive serial port selection.
//!
//! Ports are chosen in this order:
//! - the port given with `--port`
//! - the port from the configuration file
//! - a single recognised ESP32 USB bridge, picked automatically
//! - an interactive selection via dialoguer
//!
//! Non-interactive mode never prompts.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    respoolflash::{
        DetectedPort, NativePort, Port, PortInfo, PortSelector, SerialConfig, discover_ports,
        port::DEFAULT_BAUD,
    },
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // selection failures are setup problems, exit code 2
    CliError::Usage(message.to_string()).into()
}

fn cancelled_err() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

fn select_non_interactive_port(selection_ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    match selection_ports.len().cmp(&1) {
        Ordering::Equal => selection_ports
            .into_iter()
            .next()
            .ok_or_else(|| usage_err("No serial ports available")),
        Ordering::Greater => Err(usage_err(
            "Found multiple serial ports; pass --port to choose one in non-interactive mode",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<DetectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = discover_ports();

    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found. Connect the board with a data-capable USB cable",
        ));
    }

    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.device.is_known())
        .cloned()
        .collect();

    // known bridges first unless the user asks for everything
    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports)
        },
        Ordering::Equal => {
            let port = selection_ports
                .into_iter()
                .next()
                .ok_or_else(|| usage_err("No serial ports available"))?;

            if port.device.is_known() {
                info!(
                    "Auto-selected port: {} [{}]",
                    port.name(),
                    port.device.name()
                );
                Ok(port)
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled_err()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Find a port by name, falling back to a bare name the host did not list.
fn find_port_by_name(name: &str) -> DetectedPort {
    let ports = discover_ports();

    if let Some(port) = ports.iter().find(|p| p.name() == name) {
        return port.clone();
    }

    // Windows port names are case-insensitive
    if let Some(port) = ports.iter().find(|p| p.name().eq_ignore_ascii_case(name)) {
        return port.clone();
    }

    DetectedPort::from_info(PortInfo::named(name))
}

fn port_label(port: &DetectedPort) -> String {
    let name = if port.device.is_known() {
        style(port.name()).bold().to_string()
    } else {
        port.name().to_string()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .info
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(mut ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!(
        "{}",
        style("Recognised ESP32 USB bridges are shown in bold").dim()
    );

    ports.sort_by_key(|p| !p.device.is_known());

    // keep each entry on one line in narrow terminals
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| console::truncate_str(&port_label(port), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Please choose a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(cancelled_err()),
    }
}

/// Confirm use of a single unrecognised port.
fn confirm_single_port(port: DetectedPort) -> Result<DetectedPort> {
    let product_info = port
        .info
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name()))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed { Ok(port) } else { Err(cancelled_err()) }
}

/// Port identity for a selected endpoint. The OS handle is opened later.
pub fn unopened_port(port: &DetectedPort) -> NativePort {
    NativePort::unopened(
        SerialConfig::new(port.name(), DEFAULT_BAUD),
        port.info.clone(),
    )
}

/// [`PortSelector`] backed by [`select_serial_port`].
///
/// A dismissed prompt is reported as no selection; other selection failures
/// surface as [`respoolflash::Error::Config`] carrying the message.
pub struct CliPortSelector {
    options: SerialOptions,
    config: Config,
}

impl CliPortSelector {
    /// Selector using the given options and configuration.
    pub fn new(options: SerialOptions, config: Config) -> Self {
        Self { options, config }
    }
}

impl PortSelector for CliPortSelector {
    fn select(&mut self) -> respoolflash::Result<Option<Box<dyn Port>>> {
        match select_serial_port(&self.options, &self.config) {
            Ok(port) => Ok(Some(Box::new(unopened_port(&port)))),
            Err(e) => match e.downcast_ref::<CliError>() {
                Some(CliError::Cancelled(_)) => Ok(None),
                _ => Err(respoolflash::Error::Config(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        console::{measure_text_width, truncate_str},
    };

    fn unknown(name: &str) -> DetectedPort {
        DetectedPort::from_info(PortInfo::named(name))
    }

    fn bridge(name: &str, vid: u16) -> DetectedPort {
        DetectedPort::from_info(PortInfo {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(0xEA60),
            product: Some("CP2102 USB to UART Bridge Controller".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.list_all_ports);
        assert!(!options.non_interactive);
    }

    #[test]
    fn test_explicit_port_wins() {
        let options = SerialOptions {
            port: Some("/dev/ttyRESPOOL9".to_string()),
            non_interactive: true,
            ..Default::default()
        };
        let mut config = Config::default();
        config.port.connection.serial = Some("/dev/ttyOTHER".to_string());

        let port = select_serial_port(&options, &config).unwrap();
        assert_eq!(port.name(), "/dev/ttyRESPOOL9");
    }

    #[test]
    fn test_configured_port_used_without_discovery_prompt() {
        let options = SerialOptions {
            non_interactive: true,
            ..Default::default()
        };
        let mut config = Config::default();
        config.port.connection.serial = Some("/dev/ttyRESPOOL7".to_string());

        let port = select_serial_port(&options, &config).unwrap();
        assert_eq!(port.name(), "/dev/ttyRESPOOL7");
        assert!(!port.device.is_known());
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![unknown("/dev/ttyUSB0"), unknown("/dev/ttyUSB1")];

        let err = select_non_interactive_port(ports).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_select_non_interactive_single_port_returns_it() {
        let selected = select_non_interactive_port(vec![bridge("/dev/ttyUSB0", 0x10C4)]).unwrap();
        assert_eq!(selected.name(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_port_label_marks_known_bridge() {
        console::set_colors_enabled(false);
        let label = port_label(&bridge("/dev/ttyUSB0", 0x10C4));
        assert!(label.starts_with("/dev/ttyUSB0"));
        assert!(label.contains("CP210x"));
        assert!(label.contains("CP2102"));
    }

    #[test]
    fn test_port_label_shows_ids_for_unknown_usb() {
        console::set_colors_enabled(false);
        let port = DetectedPort::from_info(PortInfo {
            name: "/dev/ttyACM3".to_string(),
            vid: Some(0x2341),
            pid: Some(0x0043),
            ..Default::default()
        });
        assert_eq!(port_label(&port), "/dev/ttyACM3 (2341:0043)");
    }

    #[test]
    fn test_truncated_label_fits_terminal() {
        let label = port_label(&bridge("/dev/verylongttyusb0", 0x1A86));
        let truncated = truncate_str(&label, 26, "\u{2026}").into_owned();
        assert!(!truncated.contains('\n'));
        assert!(measure_text_width(&truncated) <= 26);
    }

    #[test]
    fn test_unopened_port_keeps_identity() {
        let port = unopened_port(&bridge("/dev/ttyUSB3", 0x303A));
        assert_eq!(port.name(), "/dev/ttyUSB3");
        assert!(!port.is_open());
        assert_eq!(port.usb_vendor_id(), Some(0x303A));
    }

    #[test]
    fn test_selector_returns_explicit_port() {
        let mut selector = CliPortSelector::new(
            SerialOptions {
                port: Some("/dev/ttyRESPOOL1".to_string()),
                ..Default::default()
            },
            Config::default(),
        );

        let port = selector.select().unwrap().unwrap();
        assert_eq!(port.name(), "/dev/ttyRESPOOL1");
    }
}
