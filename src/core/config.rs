use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{PanelError, PanelResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub api_base: String,
    pub watch_interval_ms: u64,
    pub environment_refresh_interval_ms: u64,
    pub resource_refresh_interval_ms: u64,
    /// Fallback CPU bound when `/resources` omits `cpu_available`.
    pub default_cpu_max: f64,
    /// Fallback memory bound when `/resources` omits `memory_available`.
    pub default_memory_max_mb: u64,
    pub log_level: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:5000".to_string(),
            watch_interval_ms: 2000,
            environment_refresh_interval_ms: 5000,
            resource_refresh_interval_ms: 5000,
            default_cpu_max: 8.0,
            default_memory_max_mb: 16384,
            log_level: "info".to_string(),
        }
    }
}

impl PanelConfig {
    pub fn load(path: &Path) -> PanelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PanelError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> PanelResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> PanelResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PanelError::ConfigError(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("provision-panel")
            .join("panel.toml")
    }

    pub fn validate(&self) -> PanelResult<()> {
        let intervals = [
            ("watch_interval_ms", self.watch_interval_ms),
            ("environment_refresh_interval_ms", self.environment_refresh_interval_ms),
            ("resource_refresh_interval_ms", self.resource_refresh_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(PanelError::ConfigError(format!("{} must be positive", name)));
            }
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| PanelError::ConfigError(format!("api_base: {}", e)))?;
        Ok(())
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn environment_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.environment_refresh_interval_ms)
    }

    pub fn resource_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.resource_refresh_interval_ms)
    }
}
