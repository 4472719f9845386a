use crate::domain::device::DeviceBinding;
use crate::infrastructure::ecobee_client::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BRIDGE_JSON: &str = "bridge.json";
pub const DEFAULT_ACCOUNT_ID: &str = "default";
pub const DEFAULT_UPDATE_FREQUENCY_MINUTES: u64 = 15;
pub const MIN_UPDATE_FREQUENCY_MINUTES: u64 = 3;
pub const MAX_UPDATE_FREQUENCY_MINUTES: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = DEFAULT_REQUEST_TIMEOUT.as_secs();
const MAX_REQUEST_TIMEOUT_SECONDS: u64 = 120;
const SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    #[default]
    Sqlite,
    Keyring,
    Memory,
}

impl TokenBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "keyring" => Some(Self::Keyring),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Keyring => "keyring",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub schema: u8,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_update_frequency_minutes")]
    pub update_frequency_minutes: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub token_backend: TokenBackend,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_to_file")]
    pub log_to_file: bool,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub devices: Vec<DeviceBinding>,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_update_frequency_minutes() -> u64 {
    DEFAULT_UPDATE_FREQUENCY_MINUTES
}

fn default_request_timeout_seconds() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_to_file() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            api_key: String::new(),
            api_base_url: default_api_base_url(),
            update_frequency_minutes: DEFAULT_UPDATE_FREQUENCY_MINUTES,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            token_backend: TokenBackend::default(),
            log_level: default_log_level(),
            log_to_file: default_log_to_file(),
            accounts: Vec::new(),
            devices: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.schema != SCHEMA_VERSION {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported schema {}",
                self.schema
            )));
        }
        validate_update_frequency(self.update_frequency_minutes)?;
        if !(1..=MAX_REQUEST_TIMEOUT_SECONDS).contains(&self.request_timeout_seconds) {
            return Err(InfraError::InvalidConfig(format!(
                "requestTimeoutSeconds must be between 1 and {MAX_REQUEST_TIMEOUT_SECONDS}, got {}",
                self.request_timeout_seconds
            )));
        }
        url::Url::parse(&self.api_base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("apiBaseUrl is not a valid url: {error}"))
        })?;
        for device in &self.devices {
            if device.device_id.trim().is_empty() {
                return Err(InfraError::InvalidConfig(
                    "devices[].deviceId must not be empty".to_string(),
                ));
            }
            if device.address.trim().is_empty() {
                return Err(InfraError::InvalidConfig(format!(
                    "devices[{}].address must not be empty",
                    device.device_id
                )));
            }
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str, InfraError> {
        let api_key = self.api_key.trim();
        if api_key.is_empty() {
            return Err(InfraError::InvalidConfig(
                "missing apiKey (set apiKey in config/bridge.json or ECOBEE_API_KEY)".to_string(),
            ));
        }
        Ok(api_key)
    }

    pub fn update_frequency(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.update_frequency_minutes as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Configured accounts plus any account referenced only by a device binding, in first-seen order.
    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let configured = self.accounts.iter().map(String::as_str);
        let referenced = self.devices.iter().map(|device| device.account_id.as_str());
        for raw in configured.chain(referenced) {
            let account_id = normalize_account_id(raw);
            if !ids.contains(&account_id) {
                ids.push(account_id);
            }
        }
        ids
    }
}

pub fn validate_update_frequency(minutes: u64) -> Result<u64, InfraError> {
    if (MIN_UPDATE_FREQUENCY_MINUTES..=MAX_UPDATE_FREQUENCY_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(InfraError::InvalidConfig(format!(
            "updateFrequencyMinutes must be between {MIN_UPDATE_FREQUENCY_MINUTES} and {MAX_UPDATE_FREQUENCY_MINUTES}, got {minutes}"
        )))
    }
}

pub fn normalize_account_id(account_id: &str) -> String {
    let normalized = account_id.trim();
    if normalized.is_empty() {
        DEFAULT_ACCOUNT_ID.to_string()
    } else {
        normalized.to_string()
    }
}

pub fn ensure_default_config(config_dir: &Path) -> Result<PathBuf, InfraError> {
    let path = config_dir.join(BRIDGE_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&BridgeConfig::default())?;
        fs::write(&path, format!("{formatted}\n"))?;
    }
    Ok(path)
}

pub fn load_config(config_dir: &Path) -> Result<BridgeConfig, InfraError> {
    load_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<BridgeConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = read_config(&config_dir.join(BRIDGE_JSON))?;
    apply_overrides(&mut config, &lookup)?;
    for device in &mut config.devices {
        device.account_id = normalize_account_id(&device.account_id);
    }
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<BridgeConfig, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != u64::from(SCHEMA_VERSION) {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    serde_json::from_value(parsed).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })
}

fn apply_overrides<F>(config: &mut BridgeConfig, lookup: &F) -> Result<(), InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(api_key) = optional_lookup_value(lookup, &["ECOBEE_API_KEY"]) {
        config.api_key = api_key;
    }
    if let Some(base_url) = optional_lookup_value(lookup, &["ECOBEE_API_BASE_URL"]) {
        config.api_base_url = base_url;
    }
    if let Some(raw) = optional_lookup_value(lookup, &["ECOBEE_UPDATE_FREQUENCY_MINUTES"]) {
        config.update_frequency_minutes = raw.parse().map_err(|_| {
            InfraError::InvalidConfig(format!(
                "ECOBEE_UPDATE_FREQUENCY_MINUTES must be a whole number of minutes, got '{raw}'"
            ))
        })?;
    }
    if let Some(raw) = optional_lookup_value(lookup, &["ECOBEE_TOKEN_BACKEND"]) {
        config.token_backend = TokenBackend::parse(&raw).ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "ECOBEE_TOKEN_BACKEND must be one of sqlite, keyring, memory, got '{raw}'"
            ))
        })?;
    }
    if let Some(level) = optional_lookup_value(lookup, &["ECOBEE_LOG_LEVEL"]) {
        config.log_level = level;
    }
    Ok(())
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
