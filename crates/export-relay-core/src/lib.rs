//! Core abstractions for the export relay.
//!
//! This crate provides the fundamental building blocks:
//! - `Target` / `ObserverId` / `EpisodeId` - Identifiers
//! - `Status` / `ResultEnvelope` - Per-target state and the message observers receive
//! - `StatusFeed` - Broadcast + history of status transitions
//! - `Transport` and `WorkerLink` traits for the external collaborators

pub mod deadline;
pub mod ids;
pub mod status;
pub mod status_feed;
pub mod traits;

pub use deadline::deadline_after;
pub use ids::{EpisodeId, ObserverId, Target};
pub use status::{ResultEnvelope, Status, StatusKind, WorkerReport, now_millis};
pub use status_feed::{StatusFeed, StatusUpdate};
pub use traits::{
    Completion, CompletionSink, DispatchError, Transport, TransportError, WorkerLink,
};
