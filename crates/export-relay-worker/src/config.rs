//! Worker configuration.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// How the export script is run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Command line passed to the platform shell.
    #[serde(default = "default_command")]
    pub command: String,

    /// Working directory. `~/` is expanded to the user's home.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Value for `HOME` in the child environment.
    #[serde(default)]
    pub home: Option<PathBuf>,

    /// Seconds before the process group is killed.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bytes of stdout/stderr retained per stream.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_command() -> String {
    "export_data --mode server".to_string()
}

const fn default_timeout_secs() -> u64 {
    60
}

const fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            working_dir: None,
            home: None,
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            env: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Create a config running `command` with default limits.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Process timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Working directory with `~/` expanded.
    #[must_use]
    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.as_deref().map(expand_home)
    }

    /// `HOME` override with `~/` expanded.
    #[must_use]
    pub fn resolved_home(&self) -> Option<PathBuf> {
        self.home.as_deref().map(expand_home)
    }
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
