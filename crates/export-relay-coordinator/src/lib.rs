//! Request coordination for on-demand remote exports.
//!
//! Provides:
//! - `Coordinator` - Deduplicates concurrent requests per target and tracks last status
//! - `Dispatcher` - Starts the remote worker and enforces its deadline
//! - `Broadcaster` - Fans results out to every waiting observer

pub mod broadcaster;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
mod table;

pub use broadcaster::{Broadcaster, DeliveryReport};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorError, ReportOutcome, RequestOutcome};
pub use dispatcher::Dispatcher;
