//! Settings resolution and API key storage.
//!
//! Handles:
//! - Defaults → `settings.json` in the user config dir → environment overrides
//! - API key lookup (env var first, then OS keychain via the keyring crate)
//! - Saving the API key to the keychain

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::analysis::gemini::DEFAULT_BASE_URL;
use crate::analysis::prompts::DEFAULT_MODEL;
use crate::analysis::types::Language;

const KEYRING_SERVICE: &str = "lesion-scan";
const KEYRING_USER: &str = "gemini";

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_MODEL: &str = "LESION_SCAN_MODEL";
pub const ENV_BASE_URL: &str = "LESION_SCAN_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "LESION_SCAN_TIMEOUT_SECS";
pub const ENV_LANG: &str = "LESION_SCAN_LANG";

#[derive(Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Deadline for one inference call, after which it counts as a transport failure.
    pub timeout: Duration,
    pub default_language: Language,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            default_language: Language::default(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("default_language", &self.default_language)
            .finish()
    }
}

/// On-disk shape of `settings.json`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SettingsFile {
    model: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    language: Option<String>,
}

impl Settings {
    /// Resolve settings from every layer, falling back to the keychain for
    /// the API key.
    pub fn load() -> Self {
        let mut settings = Self::default();
        if let Some(file) = read_settings_file() {
            settings.apply_file(file);
        }
        settings.apply_env(|key| std::env::var(key).ok());
        if settings.api_key.is_none() {
            settings.api_key = keychain_api_key();
        }
        log::info!("[SETTINGS] {:?}", settings);
        settings
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(model) = file.model.filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        if let Some(url) = file.base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(secs) = file.timeout_secs {
            self.set_timeout_secs(secs);
        }
        if let Some(tag) = file.language {
            self.set_language(&tag);
        }
    }

    /// Apply environment overrides. `lookup` is injectable for tests.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(model) = non_empty(ENV_MODEL) {
            self.model = model;
        }
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(raw) = non_empty(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.set_timeout_secs(secs),
                Err(_) => log::warn!("[SETTINGS] Ignoring {}={:?}: not a number", ENV_TIMEOUT_SECS, raw),
            }
        }
        if let Some(tag) = non_empty(ENV_LANG) {
            self.set_language(&tag);
        }
    }

    fn set_timeout_secs(&mut self, secs: u64) {
        if secs == 0 {
            log::warn!("[SETTINGS] Ignoring zero timeout");
            return;
        }
        self.timeout = Duration::from_secs(secs);
    }

    fn set_language(&mut self, tag: &str) {
        match Language::from_tag(tag) {
            Ok(language) => self.default_language = language,
            Err(e) => log::warn!("[SETTINGS] Ignoring default language: {}", e),
        }
    }
}

/// `<config_dir>/lesion-scan/settings.json`.
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lesion-scan")
        .join("settings.json")
}

fn read_settings_file() -> Option<SettingsFile> {
    let path = settings_path();
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(file) => {
            log::info!("[SETTINGS] Loaded {}", path.display());
            Some(file)
        }
        Err(e) => {
            log::warn!("[SETTINGS] Ignoring invalid {}: {}", path.display(), e);
            None
        }
    }
}

fn keychain_api_key() -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()?;
    match entry.get_password() {
        Ok(key) if !key.is_empty() => {
            log::info!("[SETTINGS] Loaded API key from OS keychain");
            Some(key)
        }
        _ => None,
    }
}

/// Save the API key to the OS keychain.
pub fn save_api_key(api_key: &str) -> Result<(), String> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err("API key must not be empty".to_string());
    }
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| format!("Keyring error: {}", e))?;
    entry
        .set_password(api_key)
        .map_err(|e| format!("Failed to save key: {}", e))?;
    log::info!("[SETTINGS] API key saved to OS keychain");
    Ok(())
}
