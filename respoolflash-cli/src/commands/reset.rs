//! Reset command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use log::warn;
use respoolflash::{Port, ResetPlan, ResetSignaler, ThreadDelay};

use crate::Cli;
use crate::commands::serial_options;
use crate::config::Config;
use crate::serial::{select_serial_port, unopened_port};

/// Pulse the reset lines of the selected port once.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config, plan: ResetPlan) -> Result<()> {
    let selected = select_serial_port(&serial_options(cli), config)?;
    let mut port = unopened_port(&selected);
    let signaler = ResetSignaler::new(Arc::new(ThreadDelay));

    let result = match plan {
        ResetPlan::Auto => {
            signaler.reset(&mut port, plan);
            Ok(())
        },
        ResetPlan::Pinned(strategy) => signaler
            .try_reset(&mut port, strategy)
            .with_context(|| format!("Failed to reset {} ({strategy})", port.name())),
    };

    if port.is_open() {
        if let Err(e) = port.close() {
            warn!("Failed to close serial port {}: {e}", port.name());
        }
    }
    result?;

    if !cli.quiet {
        eprintln!("{} Reset {}", style("🔄").cyan(), style(port.name()).cyan());
    }
    Ok(())
}
