//! Driver help command implementation.

use crate::presenter::format_driver_help;

/// Print the USB-UART driver guidance on stdout.
pub(crate) fn cmd_driver_help() {
    println!("{}", format_driver_help(&respoolflash::driver_help()));
}
