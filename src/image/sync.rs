//! Image sync task
//!
//! A task maps one source reference to one destination reference. A source
//! with a tag or digest is one sync unit; a bare source fans out into one unit
//! per source tag. Each unit resolves the manifest tree, copies the blobs of
//! every leaf and writes manifests children-first.

use super::blob::{BlobLedger, TransferStats, transfer_blob};
use super::config::{AuthStore, ImageConfig};
use super::reference::ImageInfo;
use super::walker::{ManifestNode, ManifestWalker};
use crate::concurrency::ConcurrencyGate;
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::{ImageDestination, ImageSource, RegistryConnector};
use crate::task::{self, Task, TaskList, task_name};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::sync::Arc;

pub struct ImageSyncTask {
    name: String,
    source: String,
    destination: String,
    auths: AuthStore,
    connector: Arc<dyn RegistryConnector>,
    gate: ConcurrencyGate,
    logger: Logger,
}

/// Endpoints and bookkeeping for one source tag
struct SyncUnit {
    source: Arc<dyn ImageSource>,
    destination: Arc<dyn ImageDestination>,
    /// The destination reference is a digest
    pinned: bool,
    stats: TransferStats,
    logger: Logger,
}

impl ImageSyncTask {
    pub fn new(
        source: &str,
        destination: &str,
        auths: AuthStore,
        connector: Arc<dyn RegistryConnector>,
        gate: ConcurrencyGate,
        logger: &Logger,
    ) -> Self {
        let name = task_name(source, destination);
        Self {
            logger: logger.with_context(&name),
            name,
            source: source.to_string(),
            destination: destination.to_string(),
            auths,
            connector,
            gate,
        }
    }

    /// Expand a bare source into one `(source, destination)` pair per tag
    async fn plan(&self, source: ImageInfo, destination: ImageInfo) -> Result<Vec<(ImageInfo, ImageInfo)>> {
        if source.has_tag_or_digest() {
            let destination = if destination.has_tag_or_digest() {
                destination
            } else {
                destination.with_tag_or_digest(&source.tag_or_digest)
            };
            return Ok(vec![(source, destination)]);
        }

        let tags = {
            let _permit = self.gate.acquire().await?;
            let auth = self.auths.get(&source.registry);
            let lister = self.connector.source(&source, &auth).await?;
            lister.get_tags().await?
        };
        self.logger
            .info(&format!("source image tags: {:?}", tags));

        Ok(tags
            .iter()
            .map(|tag| {
                (
                    source.with_tag_or_digest(tag),
                    destination.with_tag_or_digest(tag),
                )
            })
            .collect())
    }

    async fn sync_unit(&self, source: &ImageInfo, destination: &ImageInfo, ledger: &BlobLedger) -> Result<()> {
        let logger = self.logger.with_context(&source.tag_or_digest);
        logger.debug(&format!("sync {} -> {}", source, destination));

        let (source_handle, destination_handle) = {
            let _permit = self.gate.acquire().await?;
            let source_handle = self
                .connector
                .source(source, &self.auths.get(&source.registry))
                .await?;
            let destination_handle = self
                .connector
                .destination(destination, &self.auths.get(&destination.registry))
                .await?;
            (source_handle, destination_handle)
        };

        let unit = SyncUnit {
            source: source_handle,
            destination: destination_handle,
            pinned: destination.is_digest(),
            stats: TransferStats::default(),
            logger,
        };

        let root = {
            let _permit = self.gate.acquire().await?;
            unit.logger.info("parsing manifest...");
            ManifestWalker::new(unit.source.as_ref(), &unit.logger)
                .walk_root()
                .await?
        };
        unit.logger.detail(&format!(
            "resolved {} with {} platform manifest(s)",
            root.media_type,
            root.leaves().len()
        ));

        self.write_node(&unit, ledger, &root).await?;

        unit.logger.info(&format!(
            "synced {} -> {}: {} blob(s) transferred ({}), {} already present",
            source,
            destination,
            unit.stats.transferred(),
            unit.logger.format_size(unit.stats.bytes()),
            unit.stats.skipped()
        ));
        Ok(())
    }

    /// Write `node` after everything it references: blobs for a leaf, child
    /// manifests for an index
    fn write_node<'a>(
        &'a self,
        unit: &'a SyncUnit,
        ledger: &'a BlobLedger,
        node: &'a ManifestNode,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if node.is_leaf() {
                self.transfer_blobs(unit, ledger, node).await?;
            } else {
                let children = node
                    .children
                    .iter()
                    .map(move |child| self.write_node(unit, ledger, child));
                first_error(join_all(children).await)?;
            }

            self.gate
                .run(unit.destination.put_manifest(
                    node.payload(unit.pinned),
                    node.media_type.as_str(),
                    node.digest.as_deref(),
                ))
                .await?;
            unit.logger.detail(&format!(
                "put manifest {}",
                node.digest.as_deref().unwrap_or("(root)")
            ));
            Ok(())
        }
        .boxed()
    }

    async fn transfer_blobs(&self, unit: &SyncUnit, ledger: &BlobLedger, node: &ManifestNode) -> Result<()> {
        let blobs = node.blobs();
        let transfers = blobs.iter().map(move |info| {
            ledger.ensure(&info.digest, move || async move {
                let _permit = self.gate.acquire().await?;
                transfer_blob(
                    unit.source.as_ref(),
                    unit.destination.as_ref(),
                    info,
                    &unit.stats,
                    &unit.logger,
                )
                .await
            })
        });
        first_error(join_all(transfers).await)
    }
}

fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

#[async_trait]
impl Task for ImageSyncTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        let source = ImageInfo::parse(&self.source)?;
        self.logger
            .debug(&format!("source image info: {:?}", source));
        let destination = ImageInfo::parse(&self.destination)?;
        self.logger
            .debug(&format!("destination image info: {:?}", destination));

        let units = self.plan(source, destination).await?;

        // one ledger per task: every unit writes to the same repository
        let ledger = BlobLedger::new();
        let runs = units
            .iter()
            .map(|(source, destination)| self.sync_unit(source, destination, &ledger));
        first_error(join_all(runs).await)
    }
}

/// One [`ImageSyncTask`] per configured `(source, destination)` pair
pub fn generate_sync_task_list(
    config: &ImageConfig,
    connector: Arc<dyn RegistryConnector>,
    gate: &ConcurrencyGate,
    logger: &Logger,
) -> Result<TaskList> {
    let auths = config.auth_store();
    task::generate_task_list(&config.images, logger, |source, destination| {
        Arc::new(ImageSyncTask::new(
            source,
            destination,
            auths.clone(),
            Arc::clone(&connector),
            gate.clone(),
            logger,
        ))
    })
}
