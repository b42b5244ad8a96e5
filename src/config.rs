use serde::{Deserialize, Serialize};
use std::fs;

use crate::relay::{ConfigError, RelayConfig};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Alert-only JSON log under `log_dir`, never rotated
    #[serde(default = "default_alert_file")]
    pub alert_file: String,
    #[serde(default)]
    pub relay: RelayConfig,
}

fn default_alert_file() -> String {
    "alerts.log".to_string()
}

impl AppConfig {
    /// Load `config/<env>.yaml` and apply environment overrides
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)?;
        let mut config = Self::from_yaml(&content)?;
        config
            .relay
            .apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
