//! Container image mirroring
//!
//! - [`reference`]: image reference parsing
//! - [`manifest`]: manifest media types and formats
//! - [`walker`]: recursive resolution of lists and indices
//! - [`blob`]: blob transfer, dedup and statistics
//! - [`sync`]: the per-task orchestration
//! - [`config`]: image mode configuration and credentials

pub mod blob;
pub mod config;
pub mod manifest;
pub mod reference;
pub mod sync;
pub mod walker;

pub use blob::{BlobLedger, TransferStats, transfer_blob};
pub use config::{Auth, AuthStore, ImageConfig};
pub use manifest::{Manifest, MediaType};
pub use reference::{DEFAULT_NAMESPACE, DEFAULT_REGISTRY, ImageInfo, is_digest};
pub use sync::{ImageSyncTask, generate_sync_task_list};
pub use walker::{ManifestNode, ManifestWalker};
