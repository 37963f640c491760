//! Per-target state owned by the coordinator.

use std::collections::{HashMap, HashSet};

use export_relay_core::{EpisodeId, ObserverId, Status, Target};
use tokio::task::AbortHandle;

/// The in-flight episode of a target.
pub(crate) struct InFlight {
    pub episode: EpisodeId,
    pub guard: AbortHandle,
}

/// State for one target.
#[derive(Default)]
pub(crate) struct TargetState {
    pub waiters: HashSet<ObserverId>,
    pub in_flight: Option<InFlight>,
    pub last_status: Option<Status>,
    last_active: u64,
}

/// Table of all targets ever requested.
#[derive(Default)]
pub(crate) struct TargetTable {
    targets: HashMap<Target, TargetState>,
    clock: u64,
}

impl TargetTable {
    /// Get the state for `target`, creating it on first use, and mark it active.
    pub fn touch(&mut self, target: &Target) -> &mut TargetState {
        self.clock += 1;
        let clock = self.clock;
        let state = self.targets.entry(target.clone()).or_default();
        state.last_active = clock;
        state
    }

    pub fn get(&self, target: &Target) -> Option<&TargetState> {
        self.targets.get(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Target, &TargetState)> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Drop least-recently-active targets that are not in flight until
    /// at most `max` remain. Returns the evicted targets.
    pub fn evict_over(&mut self, max: usize) -> Vec<Target> {
        let excess = self.targets.len().saturating_sub(max);
        if excess == 0 {
            return Vec::new();
        }

        let mut idle: Vec<(u64, Target)> = self
            .targets
            .iter()
            .filter(|(_, s)| s.in_flight.is_none() && s.waiters.is_empty())
            .map(|(t, s)| (s.last_active, t.clone()))
            .collect();
        idle.sort_unstable_by_key(|(active, _)| *active);

        idle.into_iter()
            .take(excess)
            .map(|(_, target)| {
                self.targets.remove(&target);
                target
            })
            .collect()
    }
}
