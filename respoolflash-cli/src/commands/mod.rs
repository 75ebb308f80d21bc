//! Command implementations.
//!
//! Each subcommand is implemented in its own module; the helpers here wire
//! the library's collaborators from the CLI flags and configuration.

pub(crate) mod detect;
pub(crate) mod driver_help;
pub(crate) mod flash;
pub(crate) mod ports;
pub(crate) mod reset;
pub(crate) mod version;

use std::sync::Arc;
use std::time::Duration;

use respoolflash::{
    Collaborators, Error, HttpFirmwareSource, MemoryPreferences, Orchestrator,
    PreferenceStore, ThreadDelay,
};

use crate::config::{Config, FilePreferences};
use crate::presenter::ConsolePresenter;
use crate::esptool::EsptoolLoaderFactory;
use crate::serial::{CliPortSelector, SerialOptions};
use crate::{Cli, CliError};

pub(crate) fn serial_options(cli: &Cli) -> SerialOptions {
    SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
    }
}

pub(crate) fn firmware_source(config: &Config) -> HttpFirmwareSource {
    let source = config
        .firmware
        .base_url
        .as_deref()
        .map_or_else(HttpFirmwareSource::default, HttpFirmwareSource::new);
    match &config.firmware.version_url {
        Some(url) => source.with_version_url(url.clone()),
        None => source,
    }
}

fn preferences() -> Box<dyn PreferenceStore> {
    match Config::preferences_path() {
        Some(path) => Box::new(FilePreferences::open(path)),
        None => Box::new(MemoryPreferences::default()),
    }
}

/// Orchestrator wired to the terminal, esptool and the firmware server.
pub(crate) fn build_orchestrator(cli: &Cli, config: &Config) -> Orchestrator {
    Orchestrator::new(Collaborators {
        selector: Box::new(CliPortSelector::new(serial_options(cli), config.clone())),
        loaders: Box::new(EsptoolLoaderFactory::new(config.loader.esptool.clone())),
        firmware: Box::new(firmware_source(config)),
        prefs: preferences(),
        events: Box::new(ConsolePresenter::new(cli.quiet)),
        delay: Arc::new(ThreadDelay),
    })
    // nothing to hold on a terminal
    .with_success_display(Duration::ZERO)
}

/// Map a library failure to its CLI error class.
///
/// Failures the orchestrator reports through its events have already been
/// shown on the console.
pub(crate) fn cli_error(err: Error) -> anyhow::Error {
    match err {
        Error::NoPortSelected => CliError::Cancelled(err.to_string()).into(),
        Error::Config(message) => CliError::Usage(message).into(),
        Error::NotConnected => CliError::Usage(err.to_string()).into(),
        other => CliError::Reported(other.to_string()).into(),
    }
}
