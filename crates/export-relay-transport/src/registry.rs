//! Connection registries for observers and agents.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use export_relay_core::{
    CompletionSink, DispatchError, EpisodeId, ObserverId, ResultEnvelope, Target, Transport,
    TransportError, WorkerLink,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{AgentCommand, ServerMessage};

/// Connected observer sessions, addressable by id.
///
/// Acts as the primary `Transport`: delivering an envelope queues an
/// `export_result` message on the session's outbound channel.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    sessions: Arc<RwLock<HashMap<ObserverId, mpsc::UnboundedSender<ServerMessage>>>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session under a fresh id.
    #[must_use]
    pub fn connect(&self) -> (ObserverId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = ObserverId::new(Uuid::new_v4().to_string());
        let rx = self.register(id.clone());
        (id, rx)
    }

    /// Register a session under a known id, replacing any previous one.
    #[must_use]
    pub fn register(&self, id: ObserverId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        rx
    }

    /// Remove a session.
    pub fn disconnect(&self, id: &ObserverId) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a message for one session.
    ///
    /// # Errors
    /// Returns error if the session is unknown or its channel is closed.
    pub fn send_message(&self, id: &ObserverId, msg: ServerMessage) -> Result<(), TransportError> {
        let tx = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::ObserverGone(id.clone()))?;

        tx.send(msg).map_err(|_| {
            self.disconnect(id);
            TransportError::ChannelClosed
        })
    }
}

impl Transport for ObserverRegistry {
    fn name(&self) -> &'static str {
        "observer-session"
    }

    fn send(&self, observer: &ObserverId, envelope: &ResultEnvelope) -> Result<(), TransportError> {
        self.send_message(observer, ServerMessage::ExportResult(envelope.clone()))
    }
}

/// Connected remote agents, one per target.
///
/// Acts as the `WorkerLink` when exports run on the devices themselves:
/// the start instruction goes out over the agent's connection and the
/// result comes back as an agent message.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<Target, mpsc::UnboundedSender<AgentCommand>>>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the agent for `target`, replacing any previous connection.
    #[must_use]
    pub fn connect(&self, target: Target) -> AgentConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.clone(), tx.clone());
        AgentConnection { target, tx, rx }
    }

    /// Remove the agent for `target` if it is still the one behind `sender`.
    pub fn disconnect(&self, target: &Target, sender: &mpsc::UnboundedSender<AgentCommand>) {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        if agents
            .get(target)
            .is_some_and(|tx| tx.same_channel(sender))
        {
            agents.remove(target);
        }
    }

    /// Whether an agent is connected for `target`.
    #[must_use]
    pub fn is_connected(&self, target: &Target) -> bool {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(target)
    }

    /// Queue a command for the agent of `target`.
    ///
    /// # Errors
    /// Returns error if no agent is connected or its channel is closed.
    pub fn send_command(&self, target: &Target, cmd: AgentCommand) -> Result<(), DispatchError> {
        let tx = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
            .ok_or_else(|| DispatchError::WorkerUnavailable(target.clone()))?;

        tx.send(cmd)
            .map_err(|e| DispatchError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl WorkerLink for AgentRegistry {
    async fn begin(
        &self,
        target: &Target,
        episode: EpisodeId,
        _completions: CompletionSink,
    ) -> Result<(), DispatchError> {
        tracing::debug!(target_id = %target, %episode, "Sending run_export to agent");
        self.send_command(target, AgentCommand::RunExport { episode })
    }
}

/// One agent's registration.
pub struct AgentConnection {
    pub target: Target,
    tx: mpsc::UnboundedSender<AgentCommand>,
    /// Commands to forward to the agent.
    pub rx: mpsc::UnboundedReceiver<AgentCommand>,
}

impl AgentConnection {
    /// Sender for commands and replies on this connection.
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<AgentCommand> {
        self.tx.clone()
    }
}
