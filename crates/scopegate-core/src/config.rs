//! Configuration resolution for scopegate.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/scopegate/settings.json)
//! 3. Project config (.scopegate/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete scopegate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub introspection: IntrospectionConfig,
    #[serde(default)]
    pub consent: ConsentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Token-introspection endpoint used for remote scope checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrospectionConfig {
    pub base_url: String,
    /// Bearer token sent with every check, if the endpoint requires one.
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            token: None,
            timeout_secs: 10,
        }
    }
}

/// Where consent redirects go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// Provider consent endpoint; `/{service}/{scopes}` is appended.
    pub permission_base_url: String,
    /// Path the provider sends the user back to after consent.
    pub return_path: String,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            permission_base_url: "http://127.0.0.1:8000/api/auth/google/permissions".to_string(),
            return_path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit storage file. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved path of the persisted permission cache.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(default_storage_path)
    }
}

/// Load configuration with hierarchical resolution.
///
/// Each file overrides only the keys it sets; everything else keeps the
/// value from the layer below.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();

    // Load global config
    if let Some(global_path) = global_config_path().filter(|p| p.exists()) {
        layers.push(global_path);
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".scopegate").join("settings.json");
        if project_path.exists() {
            layers.push(project_path);
        }
    }

    let mut config = resolve_layers(&layers)?;
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("scopegate").join("settings.json"))
}

/// Default location of the persisted permission cache.
pub fn default_storage_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| {
        p.join("scopegate")
            .join(format!("{}.json", crate::storage::STORE_NAME))
    })
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    // Reject bad types here so the error names the file.
    Config::deserialize(&value).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })?;
    Ok(value)
}

/// Stack config files over the built-in defaults; later files win.
fn resolve_layers(paths: &[PathBuf]) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;
    for path in paths {
        merge_value(&mut merged, load_config_file(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

/// Objects merge key by key; any other overlay value replaces the base.
fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SCOPEGATE_INTROSPECTION_URL") {
        config.introspection.base_url = val;
    }
    if let Ok(val) = std::env::var("SCOPEGATE_INTROSPECTION_TOKEN") {
        config.introspection.token = Some(val);
    }
    if let Ok(val) = std::env::var("SCOPEGATE_PERMISSION_BASE_URL") {
        config.consent.permission_base_url = val;
    }
    if let Ok(val) = std::env::var("SCOPEGATE_STORAGE_PATH") {
        config.storage.path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("SCOPEGATE_LOG_LEVEL") {
        config.log_level = val;
    }
}
