//! Coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Human-readable action name used in status messages ("Export", "Send logs").
    #[serde(default = "default_action_name")]
    pub action_name: String,

    /// Seconds to wait for a worker to report before failing the episode.
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,

    /// Send a `Running` envelope to every requester right away.
    #[serde(default = "default_notify_running")]
    pub notify_running: bool,

    /// Evict least-recently-active idle targets beyond this count.
    #[serde(default)]
    pub max_targets: Option<usize>,
}

fn default_action_name() -> String {
    "Export".to_string()
}

const fn default_worker_timeout_secs() -> u64 {
    90
}

const fn default_notify_running() -> bool {
    true
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            action_name: default_action_name(),
            worker_timeout_secs: default_worker_timeout_secs(),
            notify_running: default_notify_running(),
            max_targets: None,
        }
    }
}

impl CoordinatorConfig {
    /// Worker timeout as a Duration.
    #[must_use]
    pub const fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    /// Message attached to `Running` envelopes.
    #[must_use]
    pub fn running_message(&self) -> String {
        format!("{} started...", self.action_name)
    }

    /// Error recorded when the worker misses its deadline.
    #[must_use]
    pub fn timeout_message(&self) -> String {
        format!(
            "{} timed out after {}s",
            self.action_name, self.worker_timeout_secs
        )
    }
}
