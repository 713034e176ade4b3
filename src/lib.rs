//! Syncer library
//!
//! Mirrors git repositories and container images from source locations to one
//! or more destinations. Work is expanded into a task list, drained by a
//! retrying [`task::Scheduler`] and bounded by one shared
//! [`concurrency::ConcurrencyGate`].

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod git;
pub mod image;
pub mod logging;
pub mod registry;
pub mod task;

pub use config::SyncOptions;
pub use error::{Result, SyncError};
pub use logging::Logger;
pub use task::{Scheduler, SyncReport, TaskList};
