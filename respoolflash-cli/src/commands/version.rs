//! Version command implementation.

use respoolflash::firmware::load_firmware_version;

use crate::commands::firmware_source;
use crate::config::Config;

/// Print the latest published firmware version on stdout.
///
/// Prints the fallback version when the server cannot be reached.
pub(crate) fn cmd_version(config: &Config) {
    println!("{}", load_firmware_version(&firmware_source(config)));
}
