//! Routes protocol messages to the coordinator.

use std::sync::Arc;

use export_relay_coordinator::{Broadcaster, Coordinator, CoordinatorConfig, CoordinatorError};
use export_relay_core::{ObserverId, Target, WorkerLink};

use crate::{
    protocol::{AgentCommand, AgentMessage, ClientMessage, ServerMessage},
    registry::{AgentRegistry, ObserverRegistry},
};

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Shared state behind every connection.
#[derive(Clone)]
pub struct RelayState {
    pub coordinator: Arc<Coordinator>,
    pub observers: ObserverRegistry,
    pub agents: AgentRegistry,
}

impl RelayState {
    /// Relay whose exports are run by connected agents.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_agents(config: CoordinatorConfig) -> Self {
        let agents = AgentRegistry::new();
        Self::build(config, Arc::new(agents.clone()), agents)
    }

    /// Relay whose exports are run by `worker`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_worker(config: CoordinatorConfig, worker: Arc<dyn WorkerLink>) -> Self {
        Self::build(config, worker, AgentRegistry::new())
    }

    fn build(config: CoordinatorConfig, worker: Arc<dyn WorkerLink>, agents: AgentRegistry) -> Self {
        let observers = ObserverRegistry::new();
        let broadcaster = Broadcaster::new(Arc::new(observers.clone()));
        Self {
            coordinator: Coordinator::spawn(config, worker, broadcaster),
            observers,
            agents,
        }
    }

    /// Handle one observer message. Returns a direct reply, if any.
    ///
    /// Export results are not replies; they arrive through the
    /// observer's session as the coordinator delivers them.
    #[must_use]
    pub fn handle_client_message(
        &self,
        observer: &ObserverId,
        msg: ClientMessage,
    ) -> Option<ServerMessage> {
        match msg {
            ClientMessage::TriggerExport { target } => {
                match self.coordinator.request_action(&target, observer) {
                    Ok(outcome) => {
                        tracing::debug!(target_id = %target, %observer, ?outcome, "Export requested");
                        None
                    }
                    Err(e) => Some(error_message(&e.into())),
                }
            }
            ClientMessage::QueryStatus { target } => match self.coordinator.last_status(&target) {
                Ok(status) => Some(ServerMessage::Status { target, status }),
                Err(e) => Some(error_message(&e.into())),
            },
            ClientMessage::Ping => Some(ServerMessage::Pong),
        }
    }

    /// Handle one message from the agent for `target`. Returns a direct
    /// reply, if any.
    #[must_use]
    pub fn handle_agent_message(&self, target: &Target, msg: AgentMessage) -> Option<AgentCommand> {
        match msg {
            AgentMessage::ExportResult(report) => {
                if let Err(e) = self.coordinator.report_result(target, report) {
                    tracing::error!(target_id = %target, "Failed to record agent result: {e}");
                }
                None
            }
            AgentMessage::Ping => Some(AgentCommand::Pong),
        }
    }
}

/// Parse an observer message from text.
///
/// # Errors
/// Returns error if the text is not a valid client message.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, RelayError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse an agent message from text.
///
/// # Errors
/// Returns error if the text is not a valid agent message.
pub fn parse_agent_message(text: &str) -> Result<AgentMessage, RelayError> {
    Ok(serde_json::from_str(text)?)
}

/// Error reply for an observer.
#[must_use]
pub fn error_message(err: &RelayError) -> ServerMessage {
    ServerMessage::Error {
        message: err.to_string(),
    }
}
