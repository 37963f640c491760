//! Local export worker.
//!
//! Provides:
//! - `ExportRunner` - Runs the export script with timeout and bounded output
//! - `LocalWorker` - `WorkerLink` implementation backed by the runner
//! - Shell detection and command parsing utilities

pub mod command;
pub mod config;
pub mod local;
pub mod runner;
pub mod shell;

pub use command::{CommandBuildError, ExportCommand};
pub use config::WorkerConfig;
pub use local::LocalWorker;
pub use runner::{ExportRunner, RunError};
