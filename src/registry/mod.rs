//! Registry module for Docker registry interactions
//!
//! The image sync talks to registries only through the [`ImageSource`],
//! [`ImageDestination`] and [`RegistryConnector`] traits. The HTTP API v2
//! implementation lives in [`client`], [`auth`] and [`operations`].

pub mod auth;
pub mod client;
pub mod operations;

pub use auth::{AuthChallenge, Credential, RegistryAuth};
pub use client::{HttpRegistryConnector, RegistryClient, RegistryClientBuilder};

use crate::error::Result;
use crate::image::{Auth, ImageInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Blob bytes as read from a source
pub type BlobStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Content-addressed blob reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobInfo {
    pub digest: String,
    /// `None` when the size is not known yet
    pub size: Option<u64>,
    /// Alternate download locations (foreign layers)
    pub urls: Vec<String>,
}

impl BlobInfo {
    pub fn new(digest: &str) -> Self {
        Self {
            digest: digest.to_string(),
            size: None,
            urls: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Read side of one image reference
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Raw manifest bytes and declared media type. `digest` selects a child
    /// manifest; `None` fetches the reference itself.
    async fn get_manifest(&self, digest: Option<&str>) -> Result<(Vec<u8>, String)>;

    async fn get_tags(&self) -> Result<Vec<String>>;

    /// Open a blob for reading. The returned size, when known, replaces
    /// whatever size `info` carried.
    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobStream, Option<u64>)>;
}

/// Write side of one image reference
#[async_trait]
pub trait ImageDestination: Send + Sync {
    async fn blob_exists(&self, info: &BlobInfo) -> Result<bool>;

    async fn put_blob(&self, stream: BlobStream, info: &BlobInfo) -> Result<()>;

    /// Store a manifest under `digest`, or under the reference's own tag or
    /// digest when `digest` is `None`
    async fn put_manifest(&self, bytes: &[u8], media_type: &str, digest: Option<&str>)
    -> Result<()>;
}

/// Builds authenticated endpoint handles for image references
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn source(&self, image: &ImageInfo, auth: &Auth) -> Result<Arc<dyn ImageSource>>;

    async fn destination(
        &self,
        image: &ImageInfo,
        auth: &Auth,
    ) -> Result<Arc<dyn ImageDestination>>;
}
