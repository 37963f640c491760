//! Server configuration.

use std::path::Path;

use anyhow::Context;
use export_relay_coordinator::CoordinatorConfig;
use export_relay_worker::WorkerConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "EXPORT_RELAY_CONFIG";

/// Where exports run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Run the export script on this host.
    #[default]
    Local,
    /// Ask the agent connected for each target.
    Agents,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub worker: WorkerMode,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub local_worker: WorkerConfig,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            worker: WorkerMode::default(),
            coordinator: CoordinatorConfig::default(),
            local_worker: WorkerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from the file named by `EXPORT_RELAY_CONFIG`, or defaults.
    ///
    /// # Errors
    /// Returns error if the named file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"worker":"agents","coordinator":{"worker_timeout_secs":30}}"#,
        )
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:3000");
        assert_eq!(config.worker, WorkerMode::Agents);
        assert_eq!(config.coordinator.worker_timeout_secs, 30);
        assert_eq!(config.coordinator.action_name, "Export");
        assert_eq!(config.local_worker.timeout_secs, 60);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = ServerConfig::from_file(Path::new("/nonexistent/relay.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
