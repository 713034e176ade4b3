//! Configuration shared by the git and image sync modes
//!
//! Config files are YAML or JSON, picked by extension. Mode-specific configs
//! ([`crate::git::GitConfig`], [`crate::image::ImageConfig`]) embed the
//! run-level knobs through [`SyncOptions`].

use crate::concurrency::ConcurrencyGate;
use crate::error::{Result, SyncError};
use crate::task::{Backoff, RetryPolicy};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RETRIES: usize = 3;

/// Number of CPUs, the default concurrency ceiling
pub fn default_proc() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Run-level settings: concurrency ceiling and retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub proc: usize,
    pub retries: usize,
    pub retry_delay: Duration,
    pub backoff: Backoff,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            proc: default_proc(),
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }
}

impl SyncOptions {
    /// Build from file values, where 0 means "not set"
    pub fn from_file_values(proc: usize, retries: usize) -> Self {
        let defaults = Self::default();
        Self {
            proc: if proc == 0 { defaults.proc } else { proc },
            retries: if retries == 0 { defaults.retries } else { retries },
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.proc == 0 {
            return Err(SyncError::Config(
                "proc must be greater than 0".to_string(),
            ));
        }
        if self.retries == 0 {
            return Err(SyncError::Config(
                "retries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries)
            .with_delay(self.retry_delay)
            .with_backoff(self.backoff)
    }

    pub fn gate(&self) -> Result<ConcurrencyGate> {
        Ok(ConcurrencyGate::new(self.proc)?)
    }
}

/// Load a YAML (`.yaml`/`.yml`) or JSON (`.json`) config file.
/// An empty file yields `T::default()`.
pub fn load_config_file<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Err(SyncError::Config(format!(
            "file {} not exist",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
            SyncError::Config(format!("error parse config file {}: {}", path.display(), e))
        }),
        Some("json") => serde_json::from_str(&content).map_err(|e| {
            SyncError::Config(format!("error parse config file {}: {}", path.display(), e))
        }),
        _ => Err(SyncError::Config(format!(
            "unsupported config file type: {} (expected .yaml, .yml or .json)",
            path.display()
        ))),
    }
}
