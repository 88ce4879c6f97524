//! User settings read by the run summary: display name and body weight.

use std::sync::Mutex;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Runner profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct UserSettings {
    /// Display name
    pub name: String,
    /// Body weight in kilograms, used for calorie estimates.
    /// Default: 80.0
    pub weight_kg: f32,
    /// True until the user has completed the first-run setup
    pub first_time_toggle: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            weight_kg: 80.0,
            first_time_toggle: true,
        }
    }
}

impl UserSettings {
    pub fn new(name: impl Into<String>, weight_kg: f32) -> Self {
        Self {
            name: name.into(),
            weight_kg,
            first_time_toggle: false,
        }
    }

    /// Check the settings can be saved.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TrackerError::invalid_settings("name must not be empty"));
        }
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 {
            return Err(TrackerError::invalid_settings(format!(
                "weight must be a positive number of kilograms, got {}",
                self.weight_kg
            )));
        }
        Ok(())
    }
}

/// Storage for the user settings.
pub trait SettingsStore {
    /// Stored settings, or the defaults when none were saved.
    fn load_settings(&self) -> Result<UserSettings>;

    /// Validate and store the settings.
    fn save_settings(&self, settings: &UserSettings) -> Result<()>;
}

/// Settings kept in memory only.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    settings: Mutex<Option<UserSettings>>,
}

impl SettingsStore for InMemorySettings {
    fn load_settings(&self) -> Result<UserSettings> {
        let guard = self
            .settings
            .lock()
            .map_err(|_| TrackerError::lock_poisoned("settings"))?;
        Ok(guard.clone().unwrap_or_default())
    }

    fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        settings.validate()?;
        *self
            .settings
            .lock()
            .map_err(|_| TrackerError::lock_poisoned("settings"))? = Some(settings.clone());
        info!("[Settings] Saved settings for '{}'", settings.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = UserSettings::default();
        assert_eq!(settings.weight_kg, 80.0);
        assert!(settings.name.is_empty());
        assert!(settings.first_time_toggle);
    }

    #[test]
    fn test_validation() {
        assert!(UserSettings::new("Alex", 72.5).validate().is_ok());
        assert!(UserSettings::new("  ", 72.5).validate().is_err());
        assert!(UserSettings::new("Alex", 0.0).validate().is_err());
        assert!(UserSettings::new("Alex", -3.0).validate().is_err());
        assert!(UserSettings::new("Alex", f32::NAN).validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: UserSettings = serde_json::from_str(r#"{"name":"Alex"}"#).unwrap();
        assert_eq!(settings.name, "Alex");
        assert_eq!(settings.weight_kg, 80.0);
    }

    #[test]
    fn test_in_memory_settings() {
        let store = InMemorySettings::default();
        assert_eq!(store.load_settings().unwrap(), UserSettings::default());

        let err = store.save_settings(&UserSettings::new("", 70.0));
        assert!(matches!(err, Err(TrackerError::InvalidSettings { .. })));
        assert_eq!(store.load_settings().unwrap(), UserSettings::default());

        let alex = UserSettings::new("Alex", 70.0);
        store.save_settings(&alex).unwrap();
        assert_eq!(store.load_settings().unwrap(), alex);
    }
}
