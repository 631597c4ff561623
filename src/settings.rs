use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{SETTINGS_DIR_NAME, SETTINGS_FILE_NAME};

/// What the panel remembers between sessions. The refresh interval is kept
/// in whole seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSettings {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
}

fn default_auto_refresh() -> bool {
    true
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            refresh_interval_secs: None,
            auto_refresh: true,
        }
    }
}

pub trait SettingsStore {
    fn load(&self) -> Result<PanelSettings>;
    fn save(&self, settings: &PanelSettings) -> Result<()>;
}

pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/panel-sync/settings.json`, falling back to the working
    /// directory when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(SETTINGS_DIR_NAME)
            .join(SETTINGS_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<PanelSettings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no settings file; using defaults");
            return Ok(PanelSettings::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings from {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("settings file {} is not valid JSON", self.path.display()))
    }

    fn save(&self, settings: &PanelSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(settings).context("failed to serialize settings")?;
        fs::write(&self.path, content)
            .with_context(|| format!("failed to write settings to {}", self.path.display()))?;
        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}
