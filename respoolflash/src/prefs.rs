//! Preference store capability.
//!
//! Preferences are a best-effort key/value store: a failed write must never
//! affect a connection or flash, so the trait has no error channel and
//! implementations log and swallow their own failures.

use std::collections::HashMap;

/// Key/value store for user preferences.
pub trait PreferenceStore: Send {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&mut self, key: &str, value: &str);
}

/// Preferences held in memory for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: HashMap<String, String>,
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}
