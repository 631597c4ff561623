use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::api::ActionEndpoint;
use crate::constants::{
    DEFAULT_RANKING_LIMIT, DEFAULT_REFRESH_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_SERVER_URL,
};
use crate::scheduler::RefreshPolicy;
use crate::settings::{JsonSettingsStore, PanelSettings};
use crate::util::{normalize_server_url, push_url};

#[derive(Clone, Debug)]
pub struct Config {
    pub server_url: String,
    pub api_key: Option<String>,
    pub refresh_interval_ms: u64,
    pub auto_refresh: bool,
    pub request_timeout: Duration,
    pub ranking_limit: usize,
    pub push: bool,
    pub demo_mode: bool,
    pub action_endpoint: ActionEndpoint,
}

impl Config {
    /// Layers the environment over stored settings.
    pub fn from_env(settings: &PanelSettings) -> Result<Self> {
        Self::resolve(settings, read_env_first)
    }

    pub fn resolve<F>(settings: &PanelSettings, lookup: F) -> Result<Self>
    where
        F: Fn(&[&str]) -> Option<String>,
    {
        let server_url = lookup(&["PANEL_SERVER_URL", "KRANIKBOT_API_URL"])
            .or_else(|| settings.server_url.clone())
            .map(|url| normalize_server_url(&url))
            .unwrap_or_else(|| {
                warn!("PANEL_SERVER_URL not set; defaulting to {}", DEFAULT_SERVER_URL);
                DEFAULT_SERVER_URL.to_string()
            });

        let api_key = lookup(&["PANEL_API_KEY", "KRANIKBOT_API_KEY"])
            .or_else(|| settings.api_key.clone())
            .filter(|key| !key.trim().is_empty());

        let refresh_interval_ms = lookup(&["PANEL_REFRESH_INTERVAL_MS"])
            .and_then(|value| value.parse::<u64>().ok())
            .or_else(|| {
                settings
                    .refresh_interval_secs
                    .map(|secs| secs.saturating_mul(1_000))
            })
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_MS);

        let auto_refresh = lookup(&["PANEL_AUTO_REFRESH"])
            .and_then(|value| parse_flag(&value))
            .unwrap_or(settings.auto_refresh);

        let request_timeout = Duration::from_millis(
            lookup(&["PANEL_REQUEST_TIMEOUT_MS"])
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        );

        let ranking_limit = lookup(&["PANEL_RANKING_LIMIT"])
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_RANKING_LIMIT);

        let push = lookup(&["PANEL_PUSH"])
            .and_then(|value| parse_flag(&value))
            .unwrap_or(false);

        let demo_mode = lookup(&["PANEL_DEMO_MODE"])
            .and_then(|value| parse_flag(&value))
            .unwrap_or(false);

        let action_endpoint = match lookup(&["PANEL_ACTION_ENDPOINT"]) {
            Some(value) => ActionEndpoint::parse(&value)
                .ok_or_else(|| anyhow!("unknown PANEL_ACTION_ENDPOINT {:?}", value))?,
            None => ActionEndpoint::default(),
        };

        Ok(Self {
            server_url,
            api_key,
            refresh_interval_ms,
            auto_refresh,
            request_timeout,
            ranking_limit,
            push,
            demo_mode,
            action_endpoint,
        })
    }

    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy::new(self.refresh_interval_ms, self.auto_refresh)
    }

    pub fn push_url(&self) -> String {
        push_url(&self.server_url)
    }

    /// Writes the persisted subset back into `settings`.
    pub fn store_into(&self, settings: &mut PanelSettings) {
        settings.server_url = Some(self.server_url.clone());
        settings.api_key = self.api_key.clone();
        settings.refresh_interval_secs = Some((self.refresh_interval_ms / 1_000).max(1));
        settings.auto_refresh = self.auto_refresh;
    }
}

pub fn settings_path() -> PathBuf {
    read_env_first(&["PANEL_SETTINGS_PATH"])
        .map(PathBuf::from)
        .unwrap_or_else(JsonSettingsStore::default_path)
}

pub fn read_env_first(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }
    None
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!(value = other, "ignoring unrecognised boolean setting");
            None
        }
    }
}
