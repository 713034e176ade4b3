//! Git sync configuration

use super::auth::KeyConfig;
use crate::config::SyncOptions;
use crate::task::Entries;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitConfig {
    pub repos: Entries,
    pub proc: usize,
    pub retries: usize,
    pub private_key_file: String,
    pub private_key_password: String,
    pub insecure_skip_tls: bool,
}

impl GitConfig {
    pub fn options(&self) -> SyncOptions {
        SyncOptions::from_file_values(self.proc, self.retries)
    }

    pub fn key_config(&self) -> KeyConfig {
        KeyConfig {
            private_key_file: (!self.private_key_file.is_empty())
                .then(|| PathBuf::from(&self.private_key_file)),
            private_key_password: self.private_key_password.clone(),
        }
    }
}

impl fmt::Debug for GitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitConfig")
            .field("repos", &self.repos)
            .field("proc", &self.proc)
            .field("retries", &self.retries)
            .field("private_key_file", &self.private_key_file)
            .field("insecure_skip_tls", &self.insecure_skip_tls)
            .finish_non_exhaustive()
    }
}
