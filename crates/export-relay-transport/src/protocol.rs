//! Wire protocol for observers and agents.

use export_relay_core::{EpisodeId, ResultEnvelope, Status, Target, WorkerReport};
use serde::{Deserialize, Serialize};

/// Message from an observer to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start (or join) an export for a target.
    TriggerExport { target: Target },
    /// Ask for the last-known status of a target.
    QueryStatus { target: Target },
    /// Ping for keepalive.
    Ping,
}

/// Message from the server to an observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Running or terminal result of an export.
    ExportResult(ResultEnvelope),
    /// Answer to a status query.
    Status {
        target: Target,
        status: Option<Status>,
    },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

/// Message from the server to a remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Begin an export. Agents should echo `episode` in their result.
    RunExport { episode: EpisodeId },
    /// Pong response.
    Pong,
}

/// Message from a remote agent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Outcome of the export.
    ExportResult(WorkerReport),
    /// Ping for keepalive.
    Ping,
}
