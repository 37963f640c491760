//! In-process worker that runs the export script on this host.

use std::sync::Arc;

use async_trait::async_trait;
use export_relay_core::{CompletionSink, DispatchError, EpisodeId, Target, WorkerLink};

use crate::{config::WorkerConfig, runner::ExportRunner};

/// Worker that runs the export locally and reports through the sink.
///
/// Useful for single-host deployments and for exercising the
/// coordinator end to end.
#[derive(Clone)]
pub struct LocalWorker {
    runner: Arc<ExportRunner>,
}

impl LocalWorker {
    /// Create a local worker.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            runner: Arc::new(ExportRunner::new(config)),
        }
    }
}

#[async_trait]
impl WorkerLink for LocalWorker {
    async fn begin(
        &self,
        target: &Target,
        episode: EpisodeId,
        completions: CompletionSink,
    ) -> Result<(), DispatchError> {
        let runner = Arc::clone(&self.runner);
        let target = target.clone();
        tracing::info!(target_id = %target, %episode, "Running export locally");

        tokio::spawn(async move {
            let report = runner.run(&target).await.for_episode(episode);
            completions.complete(target, report);
        });
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use export_relay_core::Completion;
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn test_reports_through_sink_with_episode() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let worker = LocalWorker::new(WorkerConfig::new("true"));

        tokio_test::assert_ok!(
            worker
                .begin(&Target::new("d1"), EpisodeId(9), CompletionSink::new(tx))
                .await
        );

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.target, Target::new("d1"));
        assert_eq!(completion.report.episode, Some(EpisodeId(9)));
        assert!(completion.report.success);
    }
}
