//! Settings persistence module
//!
//! Saves and loads endpoint and test settings to/from disk

use crate::error::{NetcheckError, Result};
use crate::history::DEFAULT_CAPACITY;
use crate::network_analyzer::throughput::{DOWNLOAD_URL, UPLOAD_URL};
use crate::network_analyzer::{ProbeEndpoints, ThroughputConfig};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";
const APP_NAME: &str = "netcheck";

/// Endpoint URLs for every probe and transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(flatten)]
    pub probes: ProbeEndpoints,
    #[serde(default = "default_download_url")]
    pub download_url: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
}

fn default_download_url() -> String {
    DOWNLOAD_URL.to_string()
}

fn default_upload_url() -> String {
    UPLOAD_URL.to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            probes: ProbeEndpoints::default(),
            download_url: default_download_url(),
            upload_url: default_upload_url(),
        }
    }
}

/// App settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetcheckSettings {
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Timeout for connectivity and latency probes
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Records kept in the history log
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "ThroughputConfig::download_default")]
    pub download: ThroughputConfig,
    #[serde(default = "ThroughputConfig::upload_default")]
    pub upload: ThroughputConfig,
    /// Probes in the latency series run before a speed test
    #[serde(default = "default_latency_samples")]
    pub latency_samples: u32,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_history_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_latency_samples() -> u32 {
    10
}

impl Default for NetcheckSettings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            request_timeout_secs: default_request_timeout_secs(),
            history_capacity: default_history_capacity(),
            download: ThroughputConfig::download_default(),
            upload: ThroughputConfig::upload_default(),
            latency_samples: default_latency_samples(),
        }
    }
}

impl NetcheckSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Get the settings directory path
/// Linux: ~/.config/netcheck/
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

/// Get the full path to the settings file
pub fn get_settings_path() -> Option<PathBuf> {
    get_settings_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Load settings from the default location
pub fn load_settings() -> NetcheckSettings {
    match get_settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            debug!("Could not determine settings path, using defaults");
            NetcheckSettings::default()
        }
    }
}

/// Load settings from `path`; missing or unreadable files give defaults
pub fn load_settings_from(path: &Path) -> NetcheckSettings {
    if !path.exists() {
        debug!("Settings file does not exist, using defaults");
        return NetcheckSettings::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<NetcheckSettings>(&contents) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file: {}", e);
                NetcheckSettings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            NetcheckSettings::default()
        }
    }
}

/// Save settings to the default location
pub fn save_settings(settings: &NetcheckSettings) -> Result<()> {
    let path = get_settings_path().ok_or_else(|| {
        NetcheckError::Settings("Could not determine settings directory".to_string())
    })?;
    save_settings_to(settings, &path)
}

pub fn save_settings_to(settings: &NetcheckSettings, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            NetcheckError::Settings(format!("Failed to create settings directory: {}", e))
        })?;
    }

    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| NetcheckError::Settings(format!("Failed to serialize settings: {}", e)))?;

    fs::write(path, json)
        .map_err(|e| NetcheckError::Settings(format!("Failed to write settings file: {}", e)))?;

    info!("Saved settings to {:?}", path);
    Ok(())
}
