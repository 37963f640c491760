//! Coordinator: single owner of per-target export state.

use std::sync::{
    Arc, Mutex, MutexGuard, Weak,
    atomic::{AtomicU64, Ordering},
};

use export_relay_core::{
    Completion, CompletionSink, EpisodeId, ObserverId, ResultEnvelope, Status, StatusFeed, Target,
    WorkerLink, WorkerReport, now_millis,
};
use tokio::sync::mpsc;

use crate::{
    broadcaster::{Broadcaster, DeliveryReport},
    config::CoordinatorConfig,
    dispatcher::Dispatcher,
    table::{InFlight, TargetTable},
};

/// Coordinator error.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Target id is empty")]
    EmptyTarget,
    #[error("Observer id is empty")]
    EmptyObserver,
    #[error("Coordinator state poisoned: {0}")]
    StatePoisoned(String),
}

/// What a request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The target was idle; a new episode was dispatched.
    Started(EpisodeId),
    /// An episode was already in flight; the observer joined it.
    Joined(EpisodeId),
}

impl RequestOutcome {
    /// Episode the observer is now waiting on.
    #[must_use]
    pub const fn episode(self) -> EpisodeId {
        match self {
            Self::Started(e) | Self::Joined(e) => e,
        }
    }
}

/// What a report did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The status was recorded and waiters were notified.
    Settled {
        episode: Option<EpisodeId>,
        waiters: usize,
        delivery: DeliveryReport,
    },
    /// The report named an episode that is no longer in flight.
    Stale,
}

/// Coordinates on-demand exports across concurrent observers.
///
/// At most one episode is in flight per target. Every observer that
/// requests an export while it runs is notified exactly once when it
/// settles. All state lives behind one lock; deliveries are queued
/// inside the same critical section so per-observer ordering follows
/// the order of transitions.
pub struct Coordinator {
    config: CoordinatorConfig,
    table: Mutex<TargetTable>,
    dispatcher: Dispatcher,
    broadcaster: Broadcaster,
    feed: Arc<StatusFeed>,
    episodes: AtomicU64,
    running_message: String,
}

impl Coordinator {
    /// Create a coordinator and spawn its completion loop.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        config: CoordinatorConfig,
        worker: Arc<dyn WorkerLink>,
        broadcaster: Broadcaster,
    ) -> Arc<Self> {
        Self::spawn_with_feed(config, worker, broadcaster, Arc::new(StatusFeed::new()))
    }

    /// Like [`Coordinator::spawn`], publishing transitions to `feed`.
    #[must_use]
    pub fn spawn_with_feed(
        config: CoordinatorConfig,
        worker: Arc<dyn WorkerLink>,
        broadcaster: Broadcaster,
        feed: Arc<StatusFeed>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            worker,
            CompletionSink::new(tx),
            config.worker_timeout(),
            config.timeout_message(),
        );

        let coordinator = Arc::new(Self {
            running_message: config.running_message(),
            config,
            table: Mutex::new(TargetTable::default()),
            dispatcher,
            broadcaster,
            feed,
            episodes: AtomicU64::new(1),
        });

        tokio::spawn(drain_completions(Arc::downgrade(&coordinator), rx));
        coordinator
    }

    /// Register `observer` for the outcome of `target`'s export, starting
    /// one if none is in flight. Never waits on the worker.
    ///
    /// # Errors
    /// Returns error if an id is empty or the state lock is poisoned.
    pub fn request_action(
        &self,
        target: &Target,
        observer: &ObserverId,
    ) -> Result<RequestOutcome, CoordinatorError> {
        if target.is_empty() {
            return Err(CoordinatorError::EmptyTarget);
        }
        if observer.is_empty() {
            return Err(CoordinatorError::EmptyObserver);
        }

        let mut table = self.table()?;
        let state = table.touch(target);
        state.waiters.insert(observer.clone());

        let outcome = if let Some(flight) = &state.in_flight {
            tracing::debug!(target_id = %target, %observer, episode = %flight.episode, "Joined in-flight export");
            RequestOutcome::Joined(flight.episode)
        } else {
            let episode = EpisodeId(self.episodes.fetch_add(1, Ordering::Relaxed));
            let status = Status::Running {
                started_at: now_millis(),
            };
            state.last_status = Some(status.clone());
            let guard = self.dispatcher.start(target.clone(), episode);
            state.in_flight = Some(InFlight { episode, guard });

            tracing::info!(target_id = %target, %observer, %episode, "Started {}", self.config.action_name);
            self.feed.push(target, &status);
            RequestOutcome::Started(episode)
        };

        if self.config.notify_running {
            if let Some(status @ Status::Running { .. }) = &state.last_status {
                let envelope = ResultEnvelope::from_status(target, status, &self.running_message);
                self.broadcaster.deliver_all([observer], &envelope);
            }
        }

        if let Some(max) = self.config.max_targets {
            for evicted in table.evict_over(max) {
                tracing::debug!(target_id = %evicted, "Evicted idle target");
            }
        }

        Ok(outcome)
    }

    /// Record the outcome of an episode and notify every waiter.
    ///
    /// A report naming an episode other than the one in flight is
    /// dropped. A report without an episode settles whatever is in
    /// flight, or only updates the last status if nothing is.
    ///
    /// # Errors
    /// Returns error if the state lock is poisoned.
    pub fn report_result(
        &self,
        target: &Target,
        report: WorkerReport,
    ) -> Result<ReportOutcome, CoordinatorError> {
        let mut table = self.table()?;

        let current = table
            .get(target)
            .and_then(|s| s.in_flight.as_ref())
            .map(|f| f.episode);
        if let Some(episode) = report.episode {
            if current != Some(episode) {
                tracing::warn!(target_id = %target, %episode, ?current, "Dropping stale report");
                return Ok(ReportOutcome::Stale);
            }
        }

        let state = table.touch(target);

        if let Some(flight) = state.in_flight.take() {
            flight.guard.abort();
        }

        let status = report.into_status(&self.config.action_name, now_millis());
        state.last_status = Some(status.clone());
        let waiters = std::mem::take(&mut state.waiters);

        let envelope = ResultEnvelope::from_status(target, &status, &self.running_message);
        self.feed.push(target, &status);
        let delivery = self.broadcaster.deliver_all(&waiters, &envelope);

        tracing::info!(
            target_id = %target,
            episode = ?current,
            status = ?envelope.status,
            waiters = waiters.len(),
            delivered = delivery.delivered,
            "{} settled",
            self.config.action_name
        );

        Ok(ReportOutcome::Settled {
            episode: current,
            waiters: waiters.len(),
            delivery,
        })
    }

    /// Last-known status of `target`, if it was ever requested.
    ///
    /// # Errors
    /// Returns error if the state lock is poisoned.
    pub fn last_status(&self, target: &Target) -> Result<Option<Status>, CoordinatorError> {
        Ok(self
            .table()?
            .get(target)
            .and_then(|s| s.last_status.clone()))
    }

    /// Whether an episode is in flight for `target`.
    ///
    /// # Errors
    /// Returns error if the state lock is poisoned.
    pub fn is_in_flight(&self, target: &Target) -> Result<bool, CoordinatorError> {
        Ok(self
            .table()?
            .get(target)
            .is_some_and(|s| s.in_flight.is_some()))
    }

    /// Number of observers waiting on `target`.
    ///
    /// # Errors
    /// Returns error if the state lock is poisoned.
    pub fn waiter_count(&self, target: &Target) -> Result<usize, CoordinatorError> {
        Ok(self.table()?.get(target).map_or(0, |s| s.waiters.len()))
    }

    /// Last-known status of every tracked target.
    ///
    /// # Errors
    /// Returns error if the state lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<(Target, Status)>, CoordinatorError> {
        let mut all: Vec<(Target, Status)> = self
            .table()?
            .iter()
            .filter_map(|(t, s)| s.last_status.clone().map(|status| (t.clone(), status)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    /// Number of targets currently held in the table.
    ///
    /// # Errors
    /// Returns error if the state lock is poisoned.
    pub fn tracked_targets(&self) -> Result<usize, CoordinatorError> {
        Ok(self.table()?.len())
    }

    /// Feed of status transitions.
    #[must_use]
    pub fn feed(&self) -> Arc<StatusFeed> {
        Arc::clone(&self.feed)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn table(&self) -> Result<MutexGuard<'_, TargetTable>, CoordinatorError> {
        self.table
            .lock()
            .map_err(|e| CoordinatorError::StatePoisoned(e.to_string()))
    }
}

async fn drain_completions(
    coordinator: Weak<Coordinator>,
    mut rx: mpsc::UnboundedReceiver<Completion>,
) {
    while let Some(Completion { target, report }) = rx.recv().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        if let Err(e) = coordinator.report_result(&target, report) {
            tracing::error!(target_id = %target, "Failed to record completion: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use async_trait::async_trait;
    use export_relay_core::{DispatchError, StatusKind, Transport, TransportError};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
    use tokio_test::assert_ok;

    use super::*;

    struct ChannelTransport(UnboundedSender<(ObserverId, ResultEnvelope)>);

    impl Transport for ChannelTransport {
        fn name(&self) -> &'static str {
            "channel"
        }

        fn send(&self, observer: &ObserverId, envelope: &ResultEnvelope) -> Result<(), TransportError> {
            self.0
                .send((observer.clone(), envelope.clone()))
                .map_err(|_| TransportError::ChannelClosed)
        }
    }

    type Begin = (Target, EpisodeId, CompletionSink);

    /// Hands every start instruction to the test.
    struct ManualWorker(UnboundedSender<Begin>);

    #[async_trait]
    impl WorkerLink for ManualWorker {
        async fn begin(
            &self,
            target: &Target,
            episode: EpisodeId,
            completions: CompletionSink,
        ) -> Result<(), DispatchError> {
            let _ = self.0.send((target.clone(), episode, completions));
            Ok(())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl WorkerLink for Unreachable {
        async fn begin(
            &self,
            target: &Target,
            _episode: EpisodeId,
            _completions: CompletionSink,
        ) -> Result<(), DispatchError> {
            Err(DispatchError::WorkerUnavailable(target.clone()))
        }
    }

    struct Harness {
        coordinator: Arc<Coordinator>,
        begins: UnboundedReceiver<Begin>,
        delivered: UnboundedReceiver<(ObserverId, ResultEnvelope)>,
    }

    fn harness(config: CoordinatorConfig) -> Harness {
        let (begin_tx, begins) = unbounded_channel();
        let (deliver_tx, delivered) = unbounded_channel();
        let coordinator = Coordinator::spawn(
            config,
            Arc::new(ManualWorker(begin_tx)),
            Broadcaster::new(Arc::new(ChannelTransport(deliver_tx))),
        );
        Harness {
            coordinator,
            begins,
            delivered,
        }
    }

    fn quiet() -> CoordinatorConfig {
        CoordinatorConfig {
            notify_running: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_two_observers_share_one_export() {
        let mut h = harness(CoordinatorConfig::default());
        let d1 = Target::new("d1");
        let (a, b) = (ObserverId::from("A"), ObserverId::from("B"));

        let first = assert_ok!(h.coordinator.request_action(&d1, &a));
        assert!(matches!(first, RequestOutcome::Started(_)));
        let (target, episode, sink) = h.begins.recv().await.unwrap();
        assert_eq!(target, d1);

        let second = assert_ok!(h.coordinator.request_action(&d1, &b));
        assert_eq!(second, RequestOutcome::Joined(episode));
        assert_eq!(h.coordinator.waiter_count(&d1).unwrap(), 2);

        // Both observers get immediate Running feedback.
        for expected in [&a, &b] {
            let (observer, envelope) = h.delivered.recv().await.unwrap();
            assert_eq!(&observer, expected);
            assert_eq!(envelope.status, StatusKind::Running);
            assert_eq!(envelope.message, "Export started...");
        }

        sink.complete(
            d1.clone(),
            WorkerReport::success("Export completed successfully", None).for_episode(episode),
        );

        let mut terminal = HashMap::new();
        for _ in 0..2 {
            let (observer, envelope) = h.delivered.recv().await.unwrap();
            assert!(terminal.insert(observer, envelope).is_none());
        }
        for observer in [&a, &b] {
            let envelope = &terminal[observer];
            assert_eq!(envelope.target, d1);
            assert_eq!(envelope.status, StatusKind::Succeeded);
            assert_eq!(envelope.message, "Export completed successfully");
        }

        assert!(h.begins.try_recv().is_err());
        assert!(h.delivered.try_recv().is_err());
        assert!(!h.coordinator.is_in_flight(&d1).unwrap());
        assert_eq!(h.coordinator.waiter_count(&d1).unwrap(), 0);
        match h.coordinator.last_status(&d1).unwrap() {
            Some(Status::Succeeded { message, .. }) => {
                assert_eq!(message, "Export completed successfully");
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_start_once() {
        let mut h = harness(quiet());
        let target = Target::new("d1");

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let coordinator = Arc::clone(&h.coordinator);
                let target = target.clone();
                tokio::spawn(async move {
                    coordinator
                        .request_action(&target, &ObserverId::new(format!("o{i}")))
                        .unwrap()
                })
            })
            .collect();

        let mut started = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), RequestOutcome::Started(_)) {
                started += 1;
            }
        }
        assert_eq!(started, 1);

        let (_, episode, sink) = h.begins.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.begins.try_recv().is_err());

        sink.complete(target.clone(), WorkerReport::success("done", None).for_episode(episode));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            let (observer, _) = h.delivered.recv().await.unwrap();
            assert!(seen.insert(observer), "observer notified twice");
        }
    }

    #[tokio::test]
    async fn test_reregistration_is_idempotent() {
        let mut h = harness(quiet());
        let target = Target::new("d1");
        let a = ObserverId::from("A");

        h.coordinator.request_action(&target, &a).unwrap();
        h.coordinator.request_action(&target, &a).unwrap();
        assert_eq!(h.coordinator.waiter_count(&target).unwrap(), 1);

        let (_, episode, sink) = h.begins.recv().await.unwrap();
        sink.complete(target, WorkerReport::failure("boom").for_episode(episode));

        let (_, envelope) = h.delivered.recv().await.unwrap();
        assert_eq!(envelope.status, StatusKind::Failed);
        assert_eq!(envelope.error.as_deref(), Some("boom"));
        tokio::task::yield_now().await;
        assert!(h.delivered.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_episode_and_allows_retry() {
        let mut h = harness(CoordinatorConfig {
            worker_timeout_secs: 5,
            notify_running: false,
            ..Default::default()
        });
        let d2 = Target::new("d2");
        let a = ObserverId::from("A");

        let first = h.coordinator.request_action(&d2, &a).unwrap();
        let (_, episode, late_sink) = h.begins.recv().await.unwrap();
        assert_eq!(first.episode(), episode);

        let (_, envelope) = h.delivered.recv().await.unwrap();
        assert_eq!(envelope.status, StatusKind::Failed);
        assert_eq!(envelope.error.as_deref(), Some("Export timed out after 5s"));
        assert!(!h.coordinator.is_in_flight(&d2).unwrap());
        assert!(matches!(
            h.coordinator.last_status(&d2).unwrap(),
            Some(Status::Failed { .. })
        ));

        let retry = h.coordinator.request_action(&d2, &a).unwrap();
        assert!(matches!(retry, RequestOutcome::Started(e) if e != episode));
        let (_, new_episode, _) = h.begins.recv().await.unwrap();

        // A late report for the timed-out episode must not settle the new one.
        let outcome = h
            .coordinator
            .report_result(&d2, WorkerReport::success("late", None).for_episode(episode))
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Stale);
        drop(late_sink);
        assert!(h.coordinator.is_in_flight(&d2).unwrap());
        assert_ne!(new_episode, episode);
    }

    #[tokio::test]
    async fn test_unreachable_worker_fails_immediately() {
        let (deliver_tx, mut delivered) = unbounded_channel();
        let coordinator = Coordinator::spawn(
            quiet(),
            Arc::new(Unreachable),
            Broadcaster::new(Arc::new(ChannelTransport(deliver_tx))),
        );
        let target = Target::new("offline");

        coordinator
            .request_action(&target, &ObserverId::from("A"))
            .unwrap();

        let (_, envelope) = delivered.recv().await.unwrap();
        assert_eq!(envelope.status, StatusKind::Failed);
        assert_eq!(envelope.message, "Worker unavailable for target offline");
        assert!(!coordinator.is_in_flight(&target).unwrap());
    }

    #[tokio::test]
    async fn test_out_of_band_report_updates_status() {
        let h = harness(quiet());
        let target = Target::new("d9");

        let outcome = h
            .coordinator
            .report_result(&target, WorkerReport::success("Export completed", None))
            .unwrap();

        assert!(matches!(
            outcome,
            ReportOutcome::Settled {
                episode: None,
                waiters: 0,
                ..
            }
        ));
        assert!(matches!(
            h.coordinator.last_status(&target).unwrap(),
            Some(Status::Succeeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_late_joiner_sees_terminal_status() {
        let mut h = harness(quiet());
        let d1 = Target::new("d1");
        let other = Target::new("d7");

        h.coordinator.request_action(&d1, &ObserverId::from("A")).unwrap();
        let (_, episode, sink) = h.begins.recv().await.unwrap();
        sink.complete(d1.clone(), WorkerReport::failure("no space").for_episode(episode));
        h.delivered.recv().await.unwrap();

        h.coordinator.request_action(&other, &ObserverId::from("B")).unwrap();

        let status = h.coordinator.last_status(&d1).unwrap().unwrap();
        assert!(matches!(status, Status::Failed { ref error, .. } if error == "no space"));
        assert!(matches!(
            h.coordinator.last_status(&other).unwrap(),
            Some(Status::Running { .. })
        ));
        assert_eq!(h.coordinator.snapshot().unwrap().len(), 2);
        assert!(h.coordinator.last_status(&Target::new("never")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_ids_rejected() {
        let h = harness(quiet());
        assert!(matches!(
            h.coordinator.request_action(&Target::new(""), &ObserverId::from("A")),
            Err(CoordinatorError::EmptyTarget)
        ));
        assert!(matches!(
            h.coordinator.request_action(&Target::new("d1"), &ObserverId::from(" ")),
            Err(CoordinatorError::EmptyObserver)
        ));
        assert!(h.coordinator.snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feed_and_eviction() {
        let mut h = harness(CoordinatorConfig {
            notify_running: false,
            max_targets: Some(1),
            ..Default::default()
        });
        let feed = h.coordinator.feed();
        let (d1, d2) = (Target::new("d1"), Target::new("d2"));

        h.coordinator.request_action(&d1, &ObserverId::from("A")).unwrap();
        let (_, episode, sink) = h.begins.recv().await.unwrap();
        sink.complete(d1.clone(), WorkerReport::success("ok", None).for_episode(episode));
        h.delivered.recv().await.unwrap();

        h.coordinator.request_action(&d2, &ObserverId::from("B")).unwrap();

        // d1 was idle and least recently active.
        assert!(h.coordinator.last_status(&d1).unwrap().is_none());
        assert!(h.coordinator.is_in_flight(&d2).unwrap());

        let kinds: Vec<_> = feed
            .history()
            .into_iter()
            .map(|u| (u.target.to_string(), u.status.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("d1".to_string(), StatusKind::Running),
                ("d1".to_string(), StatusKind::Succeeded),
                ("d2".to_string(), StatusKind::Running),
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_report_for_unknown_target_is_not_recorded() {
        let h = harness(quiet());
        let outcome = h
            .coordinator
            .report_result(
                &Target::new("ghost"),
                WorkerReport::failure("late").for_episode(EpisodeId(42)),
            )
            .unwrap();

        assert_eq!(outcome, ReportOutcome::Stale);
        assert_eq!(h.coordinator.tracked_targets().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_report_does_not_refresh_activity() {
        let mut h = harness(CoordinatorConfig {
            notify_running: false,
            max_targets: Some(2),
            ..Default::default()
        });
        let (d1, d2, d3) = (Target::new("d1"), Target::new("d2"), Target::new("d3"));

        for (target, observer) in [(&d1, "A"), (&d2, "B")] {
            h.coordinator
                .request_action(target, &ObserverId::from(observer))
                .unwrap();
            let (_, episode, sink) = h.begins.recv().await.unwrap();
            sink.complete(target.clone(), WorkerReport::success("ok", None).for_episode(episode));
            h.delivered.recv().await.unwrap();
        }

        let stale = h
            .coordinator
            .report_result(&d1, WorkerReport::failure("late").for_episode(EpisodeId(999)))
            .unwrap();
        assert_eq!(stale, ReportOutcome::Stale);

        h.coordinator.request_action(&d3, &ObserverId::from("C")).unwrap();

        // d1 is still the least recently active target.
        assert!(h.coordinator.last_status(&d1).unwrap().is_none());
        assert!(h.coordinator.last_status(&d2).unwrap().is_some());
        assert_eq!(h.coordinator.tracked_targets().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_from_config_still_settles() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"worker_timeout_secs":18446744073709551615,"notify_running":false}"#)
                .unwrap();
        let mut h = harness(config);
        let d1 = Target::new("d1");

        h.coordinator.request_action(&d1, &ObserverId::from("A")).unwrap();
        let (_, episode, sink) = h.begins.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.coordinator.is_in_flight(&d1).unwrap());

        sink.complete(d1.clone(), WorkerReport::success("ok", None).for_episode(episode));
        let (_, envelope) = h.delivered.recv().await.unwrap();
        assert_eq!(envelope.status, StatusKind::Succeeded);
        assert!(!h.coordinator.is_in_flight(&d1).unwrap());
    }
}
