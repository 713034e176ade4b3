//! Recursive manifest resolution
//!
//! A root manifest is classified by media type. Single-platform manifests are
//! leaves. Lists and indices have every referenced child fetched from the
//! source and resolved the same way, to any depth.

use super::manifest::{Manifest, MediaType};
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::{BlobInfo, ImageSource};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::str::FromStr;

/// One resolved manifest and its resolved children
#[derive(Debug, Clone)]
pub struct ManifestNode {
    pub media_type: MediaType,
    pub manifest: Manifest,
    /// Bytes as fetched from the source
    pub raw: Vec<u8>,
    /// Bytes to write under a tag: `raw` for leaves, re-serialized for indices
    pub bytes: Vec<u8>,
    /// Digest the parent referenced this node by; `None` for the root
    pub digest: Option<String>,
    pub children: Vec<ManifestNode>,
}

impl ManifestNode {
    pub fn is_leaf(&self) -> bool {
        !self.media_type.is_index()
    }

    /// Every single-platform manifest under this node, in index order
    pub fn leaves(&self) -> Vec<&ManifestNode> {
        if self.is_leaf() {
            vec![self]
        } else {
            self.children.iter().flat_map(ManifestNode::leaves).collect()
        }
    }

    /// Blobs of this node when it is a leaf
    pub fn blobs(&self) -> Vec<BlobInfo> {
        self.manifest.blobs()
    }

    /// Bytes to store at the destination. Digest-addressed writes must keep
    /// the exact source bytes.
    pub fn payload(&self, pinned: bool) -> &[u8] {
        if pinned || self.digest.is_some() {
            &self.raw
        } else {
            &self.bytes
        }
    }
}

pub struct ManifestWalker<'a> {
    source: &'a dyn ImageSource,
    logger: &'a Logger,
}

impl<'a> ManifestWalker<'a> {
    pub fn new(source: &'a dyn ImageSource, logger: &'a Logger) -> Self {
        Self { source, logger }
    }

    /// Fetch the reference's own manifest and resolve it
    pub async fn walk_root(&self) -> Result<ManifestNode> {
        let (raw, media_type) = self.source.get_manifest(None).await?;
        self.walk(raw, media_type, None).await
    }

    /// Resolve `raw` of declared `media_type`, fetching children on demand
    pub fn walk(
        &self,
        raw: Vec<u8>,
        media_type: String,
        digest: Option<String>,
    ) -> BoxFuture<'_, Result<ManifestNode>> {
        async move {
            let kind = MediaType::from_str(&media_type)?;
            let manifest = Manifest::parse(&raw, kind)?;

            if !kind.is_index() {
                return Ok(ManifestNode {
                    media_type: kind,
                    manifest,
                    bytes: raw.clone(),
                    raw,
                    digest,
                    children: Vec::new(),
                });
            }

            let mut children = Vec::with_capacity(manifest.children().len());
            for child in manifest.children() {
                match &child.platform {
                    Some(platform) => self.logger.debug(&format!(
                        "resolving {} manifest {}",
                        platform, child.digest
                    )),
                    None => self
                        .logger
                        .debug(&format!("resolving manifest {}", child.digest)),
                }
                let (child_raw, child_type) =
                    self.source.get_manifest(Some(&child.digest)).await?;
                let node = self
                    .walk(child_raw, child_type, Some(child.digest.clone()))
                    .await?;
                children.push(node);
            }

            let bytes = manifest.to_bytes()?;
            Ok(ManifestNode {
                media_type: kind,
                manifest,
                raw,
                bytes,
                digest,
                children,
            })
        }
        .boxed()
    }
}
