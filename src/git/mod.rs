//! Git repository mirroring
//!
//! Each configured `(source, destination)` pair becomes a [`GitSyncTask`]:
//! classify both URLs, mirror-clone the source into a transient directory and
//! force-push branches, tags and changes to the destination.

pub mod auth;
pub mod config;
pub mod known_hosts;
pub mod sync;
pub mod transport;

pub use auth::{GitAuth, KeyConfig, ResolvedRepo, UrlShape, classify};
pub use config::GitConfig;
pub use sync::{GitSyncTask, WorkDir, generate_sync_task_list};
pub use transport::{GitCli, GitTransport, MIRROR_REFSPECS, PushOutcome};
