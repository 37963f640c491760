//! Sends begin-export instructions and guards them with a deadline.

use std::{sync::Arc, time::Duration};

use export_relay_core::{
    CompletionSink, EpisodeId, Target, WorkerLink, WorkerReport, deadline_after,
};
use tokio::task::AbortHandle;

/// Issues start instructions to the worker.
///
/// Every started episode ends in exactly one report through the
/// completion sink unless the coordinator settles it first and aborts
/// the guard: a dispatch failure or a missed deadline is turned into a
/// failed report on the same path the worker uses.
pub struct Dispatcher {
    worker: Arc<dyn WorkerLink>,
    completions: CompletionSink,
    timeout: Duration,
    timeout_message: String,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        worker: Arc<dyn WorkerLink>,
        completions: CompletionSink,
        timeout: Duration,
        timeout_message: String,
    ) -> Self {
        Self {
            worker,
            completions,
            timeout,
            timeout_message,
        }
    }

    /// Start an episode for `target` without waiting on the worker.
    ///
    /// Must be called from within a Tokio runtime. The returned handle
    /// cancels the deadline guard once the episode has been settled.
    pub fn start(&self, target: Target, episode: EpisodeId) -> AbortHandle {
        let worker = Arc::clone(&self.worker);
        let sink = self.completions.clone();
        let timeout = self.timeout;
        let timeout_message = self.timeout_message.clone();

        let task = tokio::spawn(async move {
            let deadline = deadline_after(timeout);
            tracing::debug!(target_id = %target, %episode, ?timeout, "Sending start instruction");

            match tokio::time::timeout_at(deadline, worker.begin(&target, episode, sink.clone())).await {
                Ok(Ok(())) => {
                    tokio::time::sleep_until(deadline).await;
                }
                Ok(Err(e)) => {
                    tracing::warn!(target_id = %target, %episode, "Dispatch failed: {e}");
                    sink.complete(target, WorkerReport::failure(e.to_string()).for_episode(episode));
                    return;
                }
                Err(_) => {}
            }

            tracing::warn!(target_id = %target, %episode, "Worker missed its deadline");
            sink.complete(
                target,
                WorkerReport::failure(timeout_message).for_episode(episode),
            );
        });

        task.abort_handle()
    }
}
