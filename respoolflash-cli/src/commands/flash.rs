//! Flash command implementation.

use anyhow::Result;
use log::info;
use respoolflash::{BoardVariant, SubVariant};

use crate::Cli;
use crate::commands::{build_orchestrator, cli_error};
use crate::config::Config;

/// Connect, identify, flash and configure the board.
///
/// `variant` and `sub_variant` are stored as the user's selection before
/// connecting. The chip found during identification still decides the
/// board variant.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    variant: Option<BoardVariant>,
    sub_variant: Option<SubVariant>,
) -> Result<()> {
    let mut orchestrator = build_orchestrator(cli, config);

    if let Some(variant) = variant {
        orchestrator.set_board_variant(variant);
    }
    if let Some(sub) = sub_variant {
        orchestrator.set_sub_variant(sub);
    }

    let id = orchestrator.request_connection().map_err(cli_error)?;
    let selection = orchestrator.context().selection();
    if variant.is_some_and(|v| v != id.inferred_variant) {
        info!(
            "Detected {} - flashing {} firmware instead",
            id.chip_family,
            id.inferred_variant.label()
        );
    }
    info!(
        "Flashing {} ({}) on {}",
        selection.board.label(),
        selection.sub,
        orchestrator
            .session()
            .map_or("unknown port", |s| s.port_name())
    );

    orchestrator.request_flash().map_err(cli_error)
}
