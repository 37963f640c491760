//! Boundary traits for the transport and the remote worker.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{EpisodeId, ObserverId, ResultEnvelope, Target, WorkerReport};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Observer not connected: {0}")]
    ObserverGone(ObserverId),
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Serialization failed: {0}")]
    Serialize(String),
}

/// Trait for delivering envelopes to observers.
///
/// Implementations must not block: queue the envelope and return.
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Queue `envelope` for delivery to `observer`.
    ///
    /// # Errors
    /// Returns error if the observer cannot be reached through this transport.
    fn send(&self, observer: &ObserverId, envelope: &ResultEnvelope) -> Result<(), TransportError>;
}

/// Dispatch error.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Worker unavailable for target {0}")]
    WorkerUnavailable(Target),
    #[error("Failed to send start instruction: {0}")]
    SendFailed(String),
}

/// Result of a worker run, addressed to its target.
#[derive(Debug, Clone)]
pub struct Completion {
    pub target: Target,
    pub report: WorkerReport,
}

/// Callback handle a worker uses to report the outcome of an episode.
///
/// Cloneable; every clone feeds the same coordinator.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionSink {
    /// Wrap a completion channel.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self { tx }
    }

    /// Report an outcome. Silently dropped if the coordinator is gone.
    pub fn complete(&self, target: Target, report: WorkerReport) {
        if self.tx.send(Completion { target, report }).is_err() {
            tracing::debug!("Completion dropped, coordinator shut down");
        }
    }
}

/// Trait for the remote worker that performs the export.
#[async_trait]
pub trait WorkerLink: Send + Sync {
    /// Send the begin-export instruction for `target`.
    ///
    /// Returning `Ok` means the instruction was handed off; the outcome
    /// arrives later through `completions` (or through the transport,
    /// for workers that report out of band).
    ///
    /// # Errors
    /// Returns error if the worker cannot be reached.
    async fn begin(
        &self,
        target: &Target,
        episode: EpisodeId,
        completions: CompletionSink,
    ) -> Result<(), DispatchError>;
}
