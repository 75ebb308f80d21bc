//! respoolflash CLI - Command-line tool for flashing Respooler control boards.
//!
//! ## Features
//!
//! - Detect the board behind a serial port (ESP32 DevKit or Control Board V4)
//! - Download and flash the latest firmware for the detected board
//! - Apply the Standard/Pro configuration after flashing
//! - Interactive serial port selection
//! - Driver help for USB-UART bridges
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use respoolflash::{BoardVariant, ResetPlan, ResetStrategy, SubVariant};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod esptool;
mod presenter;
mod serial;

use config::Config;

/// CLI error classes, mapped to process exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user backed out of a prompt (exit code 130).
    #[error("{0}")]
    Cancelled(String),
    /// A failure the console already showed (exit code 1).
    #[error("{0}")]
    Reported(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
            Self::Reported(_) => 1,
        }
    }
}

/// respoolflash - Flash Respooler control boards over USB.
///
/// Environment variables:
///   RESPOOLFLASH_PORT              - Default serial port
///   RESPOOLFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
///   RESPOOLFLASH_CONFIG            - Configuration file
#[derive(Parser)]
#[command(name = "respoolflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/lts-design/respoolflash")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "RESPOOLFLASH_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RESPOOLFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "RESPOOLFLASH_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Board variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BoardArg {
    /// ESP32 DevKit.
    Dev,
    /// Respooler Control Board V4 (ESP32-S3).
    V4,
}

impl From<BoardArg> for BoardVariant {
    fn from(board: BoardArg) -> Self {
        match board {
            BoardArg::Dev => BoardVariant::DevKit,
            BoardArg::V4 => BoardVariant::ControlBoardV4,
        }
    }
}

/// Firmware sub-variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SubVariantArg {
    /// Standard.
    Std,
    /// Pro.
    Pro,
}

impl From<SubVariantArg> for SubVariant {
    fn from(sub: SubVariantArg) -> Self {
        match sub {
            SubVariantArg::Std => SubVariant::Standard,
            SubVariantArg::Pro => SubVariant::Pro,
        }
    }
}

/// Reset pulse sequences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    /// EN-only first, DTR/RTS if that fails.
    #[default]
    Auto,
    /// Pulse the EN line through RTS only.
    EnOnly,
    /// Classic DTR/RTS auto-reset circuit.
    DtrRts,
}

impl From<StrategyArg> for ResetPlan {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::Auto => ResetPlan::Auto,
            StrategyArg::EnOnly => ResetStrategy::EnOnly.into(),
            StrategyArg::DtrRts => ResetStrategy::DtrRts.into(),
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Detect the board, flash the latest firmware and apply its configuration.
    Flash {
        /// Board variant to start with (the detected chip takes precedence).
        #[arg(long, value_enum)]
        variant: Option<BoardArg>,

        /// Firmware sub-variant to configure.
        #[arg(long, value_enum)]
        sub_variant: Option<SubVariantArg>,
    },

    /// Detect the board behind the serial port.
    Detect,

    /// Reset the board through the serial control lines.
    Reset {
        /// Pulse sequence to use.
        #[arg(long, value_enum, default_value_t = StrategyArg::Auto)]
        strategy: StrategyArg,
    },

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Print the latest published firmware version.
    Version,

    /// Show USB-UART driver help.
    DriverHelp,
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            variant,
            sub_variant,
        } => commands::flash::cmd_flash(
            cli,
            &config,
            variant.map(Into::into),
            sub_variant.map(Into::into),
        ),
        Commands::Detect => commands::detect::cmd_detect(cli, &config),
        Commands::Reset { strategy } => {
            commands::reset::cmd_reset(cli, &config, (*strategy).into())
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Version => {
            commands::version::cmd_version(&config);
            Ok(())
        },
        Commands::DriverHelp => {
            commands::driver_help::cmd_driver_help();
            Ok(())
        },
    }
}

fn report(err: &anyhow::Error) -> ExitCode {
    let Some(cli_err) = err.downcast_ref::<CliError>() else {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        return ExitCode::FAILURE;
    };

    match cli_err {
        // the console already showed it
        CliError::Reported(message) => debug!("{message}"),
        CliError::Cancelled(message) => eprintln!("{} {message}", style("✗").yellow()),
        CliError::Usage(_) => eprintln!("{} {err:#}", style("Error:").red().bold()),
    }
    ExitCode::from(cli_err.exit_code())
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "respoolflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash_defaults() {
        let cli = Cli::try_parse_from(["respoolflash", "flash"]).unwrap();
        match cli.command {
            Commands::Flash {
                variant,
                sub_variant,
            } => {
                assert!(variant.is_none());
                assert!(sub_variant.is_none());
            },
            _ => panic!("Expected Flash command"),
        }
    }

    #[test]
    fn test_cli_parse_flash_with_overrides() {
        let cli = Cli::try_parse_from([
            "respoolflash",
            "--port",
            "/dev/ttyUSB0",
            "flash",
            "--variant",
            "v4",
            "--sub-variant",
            "pro",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        match cli.command {
            Commands::Flash {
                variant,
                sub_variant,
            } => {
                assert_eq!(variant, Some(BoardArg::V4));
                assert_eq!(sub_variant, Some(SubVariantArg::Pro));
                assert_eq!(BoardVariant::from(BoardArg::V4), BoardVariant::ControlBoardV4);
                assert_eq!(SubVariant::from(SubVariantArg::Pro), SubVariant::Pro);
            },
            _ => panic!("Expected Flash command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_variant() {
        let err = Cli::try_parse_from(["respoolflash", "flash", "--variant", "v3"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_parse_reset_strategies() {
        let cli = Cli::try_parse_from(["respoolflash", "reset"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reset {
                strategy: StrategyArg::Auto
            }
        ));

        let cli = Cli::try_parse_from(["respoolflash", "reset", "--strategy", "dtr-rts"]).unwrap();
        match cli.command {
            Commands::Reset { strategy } => {
                assert_eq!(
                    ResetPlan::from(strategy),
                    ResetPlan::Pinned(ResetStrategy::DtrRts)
                );
            },
            _ => panic!("Expected Reset command"),
        }
        assert_eq!(
            ResetPlan::from(StrategyArg::EnOnly),
            ResetPlan::Pinned(ResetStrategy::EnOnly)
        );
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["respoolflash", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "respoolflash",
            "detect",
            "-vv",
            "--non-interactive",
            "--list-all-ports",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Detect));
        assert_eq!(cli.verbose, 2);
        assert!(cli.non_interactive);
        assert!(cli.list_all_ports);
        assert_eq!(cli.config_path, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn test_cli_parse_version_and_driver_help() {
        let cli = Cli::try_parse_from(["respoolflash", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
        let cli = Cli::try_parse_from(["respoolflash", "driver-help"]).unwrap();
        assert!(matches!(cli.command, Commands::DriverHelp));
    }

    #[test]
    fn test_cli_error_exit_codes() {
        assert_eq!(CliError::Usage("x".into()).exit_code(), 2);
        assert_eq!(CliError::Cancelled("x".into()).exit_code(), 130);
        assert_eq!(CliError::Reported("x".into()).exit_code(), 1);
    }
}
