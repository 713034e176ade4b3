//! Image sync configuration and registry credentials

use crate::config::SyncOptions;
use crate::task::Entries;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Credentials for one registry
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl Auth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            insecure: false,
        }
    }

    /// Both halves are needed for basic or token login
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("insecure", &self.insecure)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Credentials keyed by registry host
    pub auth: BTreeMap<String, Auth>,
    pub images: Entries,
    pub proc: usize,
    pub retries: usize,
}

impl ImageConfig {
    pub fn options(&self) -> SyncOptions {
        SyncOptions::from_file_values(self.proc, self.retries)
    }

    pub fn auth_store(&self) -> AuthStore {
        AuthStore::new(self.auth.clone())
    }
}

/// Shared, read-only credential lookup
#[derive(Debug, Clone, Default)]
pub struct AuthStore {
    entries: Arc<BTreeMap<String, Auth>>,
}

impl AuthStore {
    pub fn new(entries: BTreeMap<String, Auth>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Credentials for `registry`; anonymous when none are configured
    pub fn get(&self, registry: &str) -> Auth {
        self.entries.get(registry).cloned().unwrap_or_default()
    }
}
