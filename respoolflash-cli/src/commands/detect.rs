//! Detect command implementation.

use anyhow::Result;

use crate::Cli;
use crate::commands::{build_orchestrator, cli_error};
use crate::config::Config;

/// Identify the board and print what was found.
///
/// Prints `<chip family>\t<variant key>\t<port>` on stdout.
pub(crate) fn cmd_detect(cli: &Cli, config: &Config) -> Result<()> {
    let mut orchestrator = build_orchestrator(cli, config);

    let id = orchestrator.request_connection().map_err(cli_error)?;
    let port = orchestrator
        .session()
        .map(|s| s.port_name().to_string())
        .unwrap_or_default();
    println!("{}\t{}\t{port}", id.chip_family, id.inferred_variant.key());

    orchestrator.disconnect();
    Ok(())
}
