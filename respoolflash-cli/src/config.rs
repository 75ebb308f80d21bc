//! Configuration file support for respoolflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RESPOOLFLASH_*)
//! 3. Local config file (./respoolflash.toml)
//! 4. Global config file (~/.config/respoolflash/config.toml)
//!
//! Board preferences live next to the global config in `preferences.toml`.

use directories::ProjectDirs;
use log::{debug, warn};
use respoolflash::PreferenceStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
const LOCAL_CONFIG: &str = "respoolflash.toml";

/// Preference file name inside the global config directory.
const PREFERENCES_FILE: &str = "preferences.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Firmware server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Base URL the firmware images are served from.
    pub base_url: Option<String>,
    /// Full URL of the latest-version text file.
    pub version_url: Option<String>,
}

/// Flash loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Path to the esptool executable.
    pub esptool: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Firmware configuration.
    #[serde(default)]
    pub firmware: FirmwareConfig,
    /// Loader configuration.
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "respoolflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get the board preference file path.
    pub fn preferences_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join(PREFERENCES_FILE))
    }

    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.firmware.base_url.is_some() {
            self.firmware.base_url = other.firmware.base_url;
        }
        if other.firmware.version_url.is_some() {
            self.firmware.version_url = other.firmware.version_url;
        }
        if other.loader.esptool.is_some() {
            self.loader.esptool = other.loader.esptool;
        }
    }
}

/// Board preferences persisted as a flat TOML table.
///
/// Reads and writes are best-effort: failures are logged and the in-memory
/// value still takes effect for the running process.
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePreferences {
    /// Open the preference file at `path`. A missing or unreadable file
    /// starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring malformed preferences in {}: {e}", path.display());
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read preferences from {}: {e}", path.display());
                BTreeMap::new()
            },
        };
        Self { path, values }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(&self.values)?;
        fs::write(&self.path, content)?;
        debug!("Saved preferences to {}", self.path.display());
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist() {
            warn!("Failed to save preferences to {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.firmware.base_url.is_none());
        assert!(config.firmware.version_url.is_none());
        assert!(config.loader.esptool.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port.connection]
serial = "/dev/ttyUSB0"

[firmware]
base_url = "https://mirror.example.com/fw/"
version_url = "https://mirror.example.com/fw/latest.txt"

[loader]
esptool = "/opt/esptool/esptool.py"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(
            config.firmware.base_url.as_deref(),
            Some("https://mirror.example.com/fw/")
        );
        assert_eq!(
            config.firmware.version_url.as_deref(),
            Some("https://mirror.example.com/fw/latest.txt")
        );
        assert_eq!(
            config.loader.esptool.as_deref(),
            Some(Path::new("/opt/esptool/esptool.py"))
        );
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.port.connection.serial.is_none());
        assert!(config.loader.esptool.is_none());
    }

    #[test]
    fn test_config_merge_overrides_set_values_only() {
        let mut base = Config::default();
        base.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.firmware.base_url = Some("https://a.example/".to_string());

        let mut other = Config::default();
        other.firmware.base_url = Some("https://b.example/".to_string());
        other.loader.esptool = Some(PathBuf::from("esptool"));

        base.merge(other);

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.firmware.base_url.as_deref(), Some("https://b.example/"));
        assert_eq!(base.loader.esptool.as_deref(), Some(Path::new("esptool")));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[port.connection]\nserial = \"COM7\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.connection.serial.as_deref(), Some("COM7"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_global_paths_mention_respoolflash() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_string_lossy().contains("respoolflash"));
            assert!(p.to_string_lossy().ends_with("config.toml"));
        }
        if let Some(p) = Config::preferences_path() {
            assert!(p.to_string_lossy().ends_with(PREFERENCES_FILE));
        }
    }

    #[test]
    fn test_preferences_persist_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(PREFERENCES_FILE);

        let mut prefs = FilePreferences::open(&path);
        assert_eq!(prefs.get("board"), None);
        prefs.set("board", "v4");
        prefs.set("variant", "pro");

        let reopened = FilePreferences::open(&path);
        assert_eq!(reopened.get("board").as_deref(), Some("v4"));
        assert_eq!(reopened.get("variant").as_deref(), Some("pro"));
    }

    #[test]
    fn test_preferences_ignore_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PREFERENCES_FILE);
        fs::write(&path, "not = [valid").unwrap();

        let prefs = FilePreferences::open(&path);
        assert_eq!(prefs.get("board"), None);
    }

    #[test]
    fn test_preferences_write_failure_keeps_value_in_memory() {
        let dir = tempdir().unwrap();
        // a directory where the file should be makes every write fail
        let path = dir.path().join("blocked");
        fs::create_dir_all(&path).unwrap();

        let mut prefs = FilePreferences::open(&path);
        prefs.set("board", "dev");
        assert_eq!(prefs.get("board").as_deref(), Some("dev"));
    }
}
