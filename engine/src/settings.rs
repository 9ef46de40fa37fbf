use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::SettingsError;
use crate::graph::DEFAULT_TIMEOUT_SECS;
use crate::parameters::{DEFAULT_MAX_RETRIES, DEFAULT_PRECISION};
use plot_sandbox::SandboxLimits;

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_precision() -> u32 {
    DEFAULT_PRECISION
}

fn default_graph_timeout_secs() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_enable_graph_generation() -> bool {
    true
}

fn default_max_array_len() -> usize {
    SandboxLimits::default().max_array_len
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Generation attempts before giving up on a parameter spec
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Float precision when neither a variable nor its spec sets one
    #[serde(default = "default_precision", alias = "precision")]
    pub default_precision: u32,
    #[serde(default = "default_graph_timeout_secs", alias = "graph_timeout")]
    pub graph_timeout_secs: f64,
    #[serde(default = "default_enable_graph_generation")]
    pub enable_graph_generation: bool,
    /// Largest array graph code may create, in elements
    #[serde(default = "default_max_array_len")]
    pub max_array_len: usize,
    /// Executable started as the sandbox worker; the running binary when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            default_precision: default_precision(),
            graph_timeout_secs: default_graph_timeout_secs(),
            enable_graph_generation: default_enable_graph_generation(),
            max_array_len: default_max_array_len(),
            worker_program: None,
        }
    }
}

impl EngineSettings {
    /// Graph timeout as a `Duration`. Unusable values fall back to the default.
    pub fn graph_timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.graph_timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => {
                tracing::warn!(
                    "[Settings] Invalid graph timeout {}s, using {}s",
                    self.graph_timeout_secs,
                    DEFAULT_TIMEOUT_SECS
                );
                Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS)
            }
        }
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            max_array_len: self.max_array_len,
            ..SandboxLimits::default()
        }
    }
}

pub fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".study-engine").join("config.json")
}

/// Load settings from the default config file
pub async fn load_settings() -> EngineSettings {
    load_settings_from(&get_config_path()).await
}

/// Load settings from `config_path`, falling back to defaults
pub async fn load_settings_from(config_path: &Path) -> EngineSettings {
    match fs::read_to_string(config_path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => {
                tracing::info!("[Settings] Loaded from {:?}", config_path);
                settings
            }
            Err(e) => {
                tracing::warn!("[Settings] Failed to parse {:?}: {}, using defaults", config_path, e);
                EngineSettings::default()
            }
        },
        Err(e) => {
            tracing::debug!(
                "[Settings] No config file at {:?}: {}, using defaults",
                config_path,
                e
            );
            EngineSettings::default()
        }
    }
}

/// Save settings to `config_path`, creating its directory if needed
pub async fn save_settings(settings: &EngineSettings, config_path: &Path) -> Result<(), SettingsError> {
    let write_error = |source| SettingsError::Write {
        path: config_path.display().to_string(),
        source,
    };

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).await.map_err(write_error)?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    fs::write(config_path, contents).await.map_err(write_error)?;

    tracing::info!("[Settings] Saved to {:?}", config_path);
    Ok(())
}
