//! Blob transfer with destination existence check and in-flight dedup

use crate::error::Result;
use crate::logging::Logger;
use crate::registry::{BlobInfo, ImageDestination, ImageSource};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

/// Counters for one sync unit
#[derive(Debug, Default)]
pub struct TransferStats {
    transferred: AtomicU64,
    skipped: AtomicU64,
    bytes: AtomicU64,
}

impl TransferStats {
    pub fn record_transfer(&self, bytes: u64) {
        self.transferred.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Coalesces concurrent transfers of the same digest
///
/// The first caller for a digest runs the transfer; concurrent callers wait
/// for it. A failed transfer leaves the digest unclaimed so a later caller
/// tries again.
#[derive(Debug, Default)]
pub struct BlobLedger {
    cells: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl BlobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ensure<F, Fut>(&self, digest: &str, transfer: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cells.entry(digest.to_string()).or_default())
        };
        cell.get_or_try_init(transfer).await?;
        Ok(())
    }

    /// Digests transferred or confirmed present
    pub fn settled(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.values().filter(|cell| cell.initialized()).count()
    }
}

/// Copy one blob unless the destination already has it
pub async fn transfer_blob(
    source: &dyn ImageSource,
    destination: &dyn ImageDestination,
    info: &BlobInfo,
    stats: &TransferStats,
    logger: &Logger,
) -> Result<()> {
    logger.verbose(&format!("trans blob: {}", info.digest));

    if destination.blob_exists(info).await? {
        logger.verbose(&format!("blob {} already exist, skipping", info.digest));
        stats.record_skip();
        return Ok(());
    }

    let (stream, size) = source.get_blob(info).await?;

    // the source's answer is authoritative for the upload
    let info = match size {
        Some(size) => info.clone().with_size(size),
        None => info.clone(),
    };

    let counted = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&counted);
    let stream = stream.inspect_ok(move |chunk| {
        counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    });

    destination.put_blob(Box::pin(stream), &info).await?;

    let bytes = counted.load(Ordering::Relaxed);
    stats.record_transfer(bytes);
    logger.verbose(&format!(
        "trans blob: {} success ({})",
        info.digest,
        logger.format_size(bytes)
    ));
    Ok(())
}
