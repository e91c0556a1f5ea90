//! User settings and their flat TOML store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const MIN_CHARGE_LIMIT: u8 = 50;
pub const MAX_CHARGE_LIMIT: u8 = 100;
pub const DEFAULT_CHARGE_LIMIT: u8 = 80;

pub fn clamp_charge_limit(value: u8) -> u8 {
    value.clamp(MIN_CHARGE_LIMIT, MAX_CHARGE_LIMIT)
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// A snapshot of the user's choices. The policy engine treats this as an
/// immutable input per call; only the store mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatterySettings {
    #[serde(default)]
    pub limit_control_enabled: bool,
    #[serde(default = "default_charge_limit")]
    pub charge_limit: u8,
    #[serde(default)]
    pub keep_state_on_quit: bool,
    #[serde(default = "default_allow_smc_writes")]
    pub allow_smc_writes: bool,
}

fn default_charge_limit() -> u8 {
    DEFAULT_CHARGE_LIMIT
}

fn default_allow_smc_writes() -> bool {
    true
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            limit_control_enabled: false,
            charge_limit: DEFAULT_CHARGE_LIMIT,
            keep_state_on_quit: false,
            allow_smc_writes: true,
        }
    }
}

/// TOML-backed settings store.
///
/// `load` never fails: a missing or unreadable file yields the defaults, and
/// out-of-range limits are clamped on the way in and out.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The per-user config location.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            Path::new(&home)
                .join("Library/Application Support/chargecap")
                .join("config.toml"),
        )
    }

    pub fn open_default() -> Self {
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("chargecap.toml"));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> BatterySettings {
        let mut settings = match std::fs::read_to_string(&self.path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "settings file unreadable, using defaults");
                    BatterySettings::default()
                }
            },
            Err(_) => BatterySettings::default(),
        };
        settings.charge_limit = clamp_charge_limit(settings.charge_limit);
        settings
    }

    pub fn save(&self, settings: &BatterySettings) -> Result<(), SettingsError> {
        let mut settings = settings.clone();
        settings.charge_limit = clamp_charge_limit(settings.charge_limit);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(&settings)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.toml"));
        assert_eq!(store.load(), BatterySettings::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.toml"));
        let settings = BatterySettings {
            limit_control_enabled: true,
            charge_limit: 75,
            keep_state_on_quit: true,
            allow_smc_writes: false,
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn out_of_range_limits_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.toml"));
        let mut settings = BatterySettings::default();
        settings.charge_limit = 30;
        store.save(&settings).unwrap();
        assert_eq!(store.load().charge_limit, MIN_CHARGE_LIMIT);
    }

    #[test]
    fn garbage_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let store = SettingsStore::new(path);
        assert_eq!(store.load(), BatterySettings::default());
    }
}
