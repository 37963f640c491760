//! Broadcast + history feed of status transitions.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Status, Target};

/// Default number of transitions kept for late subscribers.
const HISTORY_LEN: usize = 1024;

/// One status transition for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub target: Target,
    pub status: Status,
}

/// Feed of status transitions with broadcast and history support.
///
/// UIs that (re)connect receive the retained history first and then
/// switch to live updates.
pub struct StatusFeed {
    history: RwLock<VecDeque<StatusUpdate>>,
    capacity: usize,
    sender: broadcast::Sender<StatusUpdate>,
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusFeed {
    /// Create a feed with the default history length.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_LEN)
    }

    /// Create a feed retaining at most `capacity` transitions.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            sender,
        }
    }

    /// Push a transition to both live listeners and history.
    pub fn push(&self, target: &Target, status: &Status) {
        let update = StatusUpdate {
            target: target.clone(),
            status: status.clone(),
        };
        let _ = self.sender.send(update.clone()); // live listeners

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(update);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<StatusUpdate> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Lagged live updates are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, StatusUpdate> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| future::ready(res.ok()));

        Box::pin(hist.chain(live))
    }

    /// History plus live updates restricted to one target.
    #[must_use]
    pub fn target_stream(
        &self,
        target: Target,
    ) -> futures::stream::BoxStream<'static, StatusUpdate> {
        self.history_plus_stream()
            .filter(move |u| future::ready(u.target == target))
            .boxed()
    }

    /// SSE stream (requires `sse` feature).
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn sse_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<axum::response::sse::Event, std::io::Error>>
    {
        self.history_plus_stream()
            .map(|update| {
                axum::response::sse::Event::default()
                    .event("status")
                    .json_data(&update)
                    .map_err(std::io::Error::other)
            })
            .boxed()
    }
}
