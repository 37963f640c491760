//! Per-target status and the envelope delivered to observers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EpisodeId, Target};

/// Current wall-clock time in Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Last-known status of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    /// Nothing has run yet.
    Idle,
    /// An episode is in flight.
    Running { started_at: i64 },
    /// The last episode completed successfully.
    Succeeded {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        completed_at: i64,
    },
    /// The last episode failed, timed out, or could not be dispatched.
    Failed { error: String, completed_at: i64 },
}

impl Status {
    /// Discriminant without the data.
    #[must_use]
    pub const fn kind(&self) -> StatusKind {
        match self {
            Self::Idle => StatusKind::Idle,
            Self::Running { .. } => StatusKind::Running,
            Self::Succeeded { .. } => StatusKind::Succeeded,
            Self::Failed { .. } => StatusKind::Failed,
        }
    }

    /// Whether this is `Succeeded` or `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Status discriminant as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Message delivered to every observer of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub target: Target,
    pub status: StatusKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    /// Build the envelope describing `status`.
    ///
    /// `running_message` is used for the `Running` state, which carries
    /// no text of its own.
    #[must_use]
    pub fn from_status(target: &Target, status: &Status, running_message: &str) -> Self {
        let (message, payload, error) = match status {
            Status::Idle => (String::new(), None, None),
            Status::Running { .. } => (running_message.to_string(), None, None),
            Status::Succeeded {
                message, payload, ..
            } => (message.clone(), payload.clone(), None),
            Status::Failed { error, .. } => (error.clone(), None, Some(error.clone())),
        };

        Self {
            target: target.clone(),
            status: status.kind(),
            message,
            payload,
            error,
        }
    }
}

/// Outcome reported by a worker for one dispatched episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Episode this report settles. `None` when the worker cannot echo it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeId>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerReport {
    /// Successful outcome.
    #[must_use]
    pub fn success(message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            episode: None,
            success: true,
            message: Some(message.into()),
            payload,
            error: None,
        }
    }

    /// Failed outcome.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            episode: None,
            success: false,
            message: None,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Tag the report with the episode it settles.
    #[must_use]
    pub const fn for_episode(mut self, episode: EpisodeId) -> Self {
        self.episode = Some(episode);
        self
    }

    /// Convert into a terminal status, filling in default texts.
    #[must_use]
    pub fn into_status(self, action_name: &str, completed_at: i64) -> Status {
        if self.success {
            Status::Succeeded {
                message: self
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("{action_name} completed")),
                payload: self.payload,
                completed_at,
            }
        } else {
            Status::Failed {
                error: self
                    .error
                    .or(self.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("{action_name} failed")),
                completed_at,
            }
        }
    }
}
