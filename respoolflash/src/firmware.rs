//! Firmware images and version lookup.
//!
//! Images are served as `<base>/<board file>` and the current version as a
//! small text file next to them. Both are fetched uncached so a freshly
//! published image is picked up immediately.

use log::{debug, warn};

use crate::board::BoardVariant;
use crate::error::Result;

/// Distribution server directory.
pub const DEFAULT_BASE_URL: &str = "https://download.lts-design.com/Firmware/";

/// File holding the latest published version.
pub const VERSION_FILE: &str = "latest_board_firmware.txt";

/// Version reported when the version file is unavailable.
pub const FALLBACK_VERSION: &str = "0.0.0";

/// Where firmware images come from.
pub trait FirmwareSource: Send {
    /// Fetch the full image for `variant`.
    fn fetch_image(&self, variant: BoardVariant) -> Result<Vec<u8>>;

    /// Latest published version. Never fails; falls back to
    /// [`FALLBACK_VERSION`].
    fn latest_version(&self) -> String;
}

/// Extract the version from the version file body.
pub fn parse_version(body: &str) -> String {
    body.split_whitespace()
        .next()
        .unwrap_or(FALLBACK_VERSION)
        .to_string()
}

/// Join a base directory URL and a file name.
pub fn join_url(base: &str, file: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file)
}

#[cfg(feature = "http")]
pub use http::HttpFirmwareSource;

#[cfg(feature = "http")]
mod http {
    use std::io::Read;
    use std::time::Duration;

    use super::{DEFAULT_BASE_URL, FALLBACK_VERSION, FirmwareSource, VERSION_FILE, join_url, parse_version};
    use crate::board::BoardVariant;
    use crate::error::{Error, Result};
    use log::{debug, warn};

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Fetches firmware over HTTPS.
    #[derive(Clone)]
    pub struct HttpFirmwareSource {
        agent: ureq::Agent,
        base_url: String,
        version_url: String,
    }

    impl Default for HttpFirmwareSource {
        fn default() -> Self {
            Self::new(DEFAULT_BASE_URL)
        }
    }

    impl HttpFirmwareSource {
        /// Source serving images from `base_url`, with the version file in
        /// the same directory.
        pub fn new(base_url: impl Into<String>) -> Self {
            let base_url = base_url.into();
            let version_url = join_url(&base_url, VERSION_FILE);
            Self {
                agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
                base_url,
                version_url,
            }
        }

        /// Read the version from a different URL.
        #[must_use]
        pub fn with_version_url(mut self, url: impl Into<String>) -> Self {
            self.version_url = url.into();
            self
        }

        /// URL of the version file.
        pub fn version_url(&self) -> &str {
            &self.version_url
        }

        /// Image URL for `variant`.
        pub fn image_url(&self, variant: BoardVariant) -> String {
            join_url(&self.base_url, variant.firmware_file())
        }

        fn get(&self, url: &str) -> Result<ureq::Response> {
            debug!("GET {url}");
            match self
                .agent
                .get(url)
                .set("Cache-Control", "no-store")
                .call()
            {
                Ok(response) => Ok(response),
                Err(ureq::Error::Status(status, _)) => Err(Error::FirmwareDownloadFailed { status }),
                Err(ureq::Error::Transport(t)) => Err(Error::Network(t.to_string())),
            }
        }
    }

    impl FirmwareSource for HttpFirmwareSource {
        fn fetch_image(&self, variant: BoardVariant) -> Result<Vec<u8>> {
            let response = self.get(&self.image_url(variant))?;
            let mut image = Vec::new();
            response.into_reader().read_to_end(&mut image)?;
            debug!("Fetched {} bytes of {} firmware", image.len(), variant);
            Ok(image)
        }

        fn latest_version(&self) -> String {
            let body = self
                .get(&self.version_url)
                .and_then(|r| r.into_string().map_err(Error::from));
            match body {
                Ok(body) => parse_version(&body),
                Err(e) => {
                    warn!("Could not read firmware version: {e}");
                    FALLBACK_VERSION.to_string()
                },
            }
        }
    }
}

/// Fetch the latest version and log it.
pub fn load_firmware_version(source: &dyn FirmwareSource) -> String {
    let version = source.latest_version();
    if version == FALLBACK_VERSION {
        warn!("Firmware version unknown");
    } else {
        debug!("Latest firmware version {version}");
    }
    version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_takes_first_token() {
        assert_eq!(parse_version("1.4.2\n"), "1.4.2");
        assert_eq!(parse_version("  2.0.0 released 2024-05-01\n"), "2.0.0");
        assert_eq!(parse_version(""), "0.0.0");
        assert_eq!(parse_version("   \n"), "0.0.0");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url(DEFAULT_BASE_URL, BoardVariant::DevKit.firmware_file()),
            "https://download.lts-design.com/Firmware/ESP32-WROOM-32_latest.bin"
        );
        assert_eq!(join_url("http://host/fw", "a.bin"), "http://host/fw/a.bin");
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_source_urls() {
        let source = HttpFirmwareSource::default();
        assert_eq!(
            source.image_url(BoardVariant::ControlBoardV4),
            "https://download.lts-design.com/Firmware/ControlBoard_V4_latest.bin"
        );
        assert_eq!(
            source.version_url(),
            "https://download.lts-design.com/Firmware/latest_board_firmware.txt"
        );
    }
}
