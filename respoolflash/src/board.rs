//! Chip families and board variants.
//!
//! A [`BoardVariant`] decides everything that differs between the two
//! supported Respooler boards: which firmware image is fetched, which chip
//! family the handshake must report, the loader baud rate and the reset
//! pulse strategy. The [`SubVariant`] only travels to the device in the
//! post-flash configuration line.

use std::fmt;

use log::debug;

use crate::prefs::PreferenceStore;
use crate::reset::ResetStrategy;

/// Preference key of the selected board variant.
pub const BOARD_KEY: &str = "board";

/// Preference key of the selected sub-variant.
pub const SUB_VARIANT_KEY: &str = "variant";

/// Conservative baud rate for USB-UART bridges.
///
/// Several bridge/driver combinations (notably on Windows) drop bytes at
/// 921600, so DevKit boards always flash at this rate.
pub const UART_BRIDGE_BAUD: u32 = 115_200;

/// Baud rate for boards using the chip's native USB peripheral.
pub const NATIVE_USB_BAUD: u32 = 921_600;

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChipFamily {
    /// Plain ESP32 (Xtensa dual core, no native USB).
    Esp32,
    /// ESP32-S3 (native USB).
    Esp32S3,
}

impl ChipFamily {
    /// Canonical upper-case name, as reported by the ROM loader.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Esp32 => "ESP32",
            Self::Esp32S3 => "ESP32-S3",
        }
    }

    /// Get the chip family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "ESP32" => Some(Self::Esp32),
            "ESP32-S3" | "ESP32S3" => Some(Self::Esp32S3),
            _ => None,
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hardware profile selecting firmware image, baud rate and reset strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoardVariant {
    /// ESP32-WROOM-32 DevKit behind a USB-UART bridge.
    #[default]
    DevKit,
    /// Respooler Control Board V4 (ESP32-S3, native USB).
    ControlBoardV4,
}

impl BoardVariant {
    /// All variants, in display order.
    pub const ALL: [Self; 2] = [Self::DevKit, Self::ControlBoardV4];

    /// Chip family the handshake must report for this board.
    pub fn chip_family(&self) -> ChipFamily {
        match self {
            Self::DevKit => ChipFamily::Esp32,
            Self::ControlBoardV4 => ChipFamily::Esp32S3,
        }
    }

    /// Loader baud rate.
    pub fn baud_rate(&self) -> u32 {
        match self {
            Self::DevKit => UART_BRIDGE_BAUD,
            Self::ControlBoardV4 => NATIVE_USB_BAUD,
        }
    }

    /// Reset pulse strategy matching the board's auto-reset wiring.
    pub fn reset_strategy(&self) -> ResetStrategy {
        match self {
            Self::DevKit => ResetStrategy::EnOnly,
            Self::ControlBoardV4 => ResetStrategy::DtrRts,
        }
    }

    /// File name of the latest firmware image on the distribution server.
    pub fn firmware_file(&self) -> &'static str {
        match self {
            Self::DevKit => "ESP32-WROOM-32_latest.bin",
            Self::ControlBoardV4 => "ControlBoard_V4_latest.bin",
        }
    }

    /// Human-readable board name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DevKit => "ESP32 DevKit",
            Self::ControlBoardV4 => "Control Board",
        }
    }

    /// Token stored in the preference store.
    pub fn key(&self) -> &'static str {
        match self {
            Self::DevKit => "dev",
            Self::ControlBoardV4 => "v4",
        }
    }

    /// Parse a preference token.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "dev" | "devkit" => Some(Self::DevKit),
            "v4" | "controlboard" => Some(Self::ControlBoardV4),
            _ => None,
        }
    }
}

impl fmt::Display for BoardVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Product tier sent to the device after flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubVariant {
    /// Standard Respooler.
    #[default]
    Standard,
    /// Respooler Pro.
    Pro,
}

impl SubVariant {
    /// Tag carried in the configuration payload.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Standard => "STD",
            Self::Pro => "PRO",
        }
    }

    /// Token stored in the preference store.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Standard => "std",
            Self::Pro => "pro",
        }
    }

    /// Parse a preference token.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "std" | "standard" => Some(Self::Standard),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }
}

impl fmt::Display for SubVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("Standard"),
            Self::Pro => f.write_str("Pro"),
        }
    }
}

/// The board/sub-variant pair remembered across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariantSelection {
    /// Selected board variant.
    pub board: BoardVariant,
    /// Selected sub-variant.
    pub sub: SubVariant,
}

impl VariantSelection {
    /// Load the last-known-good selection, falling back to defaults.
    pub fn load(prefs: &dyn PreferenceStore) -> Self {
        let board = prefs
            .get(BOARD_KEY)
            .and_then(|v| BoardVariant::from_key(&v))
            .unwrap_or_default();
        let sub = prefs
            .get(SUB_VARIANT_KEY)
            .and_then(|v| SubVariant::from_key(&v))
            .unwrap_or_default();
        debug!("Loaded selection: board={board:?}, sub={sub:?}");
        Self { board, sub }
    }

    /// Select a board variant, persisting it only when it changed.
    ///
    /// Returns whether the selection changed.
    pub fn set_board(&mut self, board: BoardVariant, prefs: &mut dyn PreferenceStore) -> bool {
        if self.board == board {
            return false;
        }
        self.board = board;
        prefs.set(BOARD_KEY, board.key());
        true
    }

    /// Select a sub-variant, persisting it only when it changed.
    pub fn set_sub(&mut self, sub: SubVariant, prefs: &mut dyn PreferenceStore) -> bool {
        if self.sub == sub {
            return false;
        }
        self.sub = sub;
        prefs.set(SUB_VARIANT_KEY, sub.key());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPreferences;

    #[test]
    fn test_chip_family_from_name() {
        assert_eq!(ChipFamily::from_name("esp32"), Some(ChipFamily::Esp32));
        assert_eq!(ChipFamily::from_name("ESP32-S3"), Some(ChipFamily::Esp32S3));
        assert_eq!(ChipFamily::from_name("ESP32-C3"), None);
    }

    #[test]
    fn test_variant_parameters() {
        assert_eq!(BoardVariant::DevKit.baud_rate(), 115200);
        assert_eq!(BoardVariant::ControlBoardV4.baud_rate(), 921600);
        assert_eq!(BoardVariant::DevKit.reset_strategy(), ResetStrategy::EnOnly);
        assert_eq!(BoardVariant::ControlBoardV4.reset_strategy(), ResetStrategy::DtrRts);
        assert_eq!(BoardVariant::ControlBoardV4.chip_family().name(), "ESP32-S3");
    }

    #[test]
    fn test_keys_parse_back() {
        for board in BoardVariant::ALL {
            assert_eq!(BoardVariant::from_key(board.key()), Some(board));
        }
        assert_eq!(SubVariant::from_key("PRO"), Some(SubVariant::Pro));
        assert_eq!(SubVariant::from_key("gold"), None);
    }

    #[test]
    fn test_selection_defaults_when_store_empty() {
        let prefs = MemoryPreferences::default();
        let selection = VariantSelection::load(&prefs);
        assert_eq!(selection.board, BoardVariant::DevKit);
        assert_eq!(selection.sub, SubVariant::Standard);
    }

    #[test]
    fn test_selection_ignores_garbage_values() {
        let mut prefs = MemoryPreferences::default();
        prefs.set(BOARD_KEY, "v9");
        prefs.set(SUB_VARIANT_KEY, "pro");
        let selection = VariantSelection::load(&prefs);
        assert_eq!(selection.board, BoardVariant::DevKit);
        assert_eq!(selection.sub, SubVariant::Pro);
    }

    #[test]
    fn test_selection_persists_only_changes() {
        let mut prefs = MemoryPreferences::default();
        let mut selection = VariantSelection::default();

        assert!(!selection.set_board(BoardVariant::DevKit, &mut prefs));
        assert_eq!(prefs.get(BOARD_KEY), None);

        assert!(selection.set_board(BoardVariant::ControlBoardV4, &mut prefs));
        assert_eq!(prefs.get(BOARD_KEY).as_deref(), Some("v4"));

        assert!(selection.set_sub(SubVariant::Pro, &mut prefs));
        assert_eq!(prefs.get(SUB_VARIANT_KEY).as_deref(), Some("pro"));
    }
}
