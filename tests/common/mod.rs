//! In-memory registry and git transport used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{TryStreamExt, stream};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syncer::error::{Result, SyncError};
use syncer::git::{GitAuth, GitTransport, PushOutcome};
use syncer::image::manifest::{DOCKER_V2_LIST, DOCKER_V2_SCHEMA2, OCI_INDEX, OCI_MANIFEST};
use syncer::image::{Auth, ImageInfo};
use syncer::registry::{BlobInfo, BlobStream, ImageDestination, ImageSource, RegistryConnector};

pub fn digest(n: u32) -> String {
    format!("sha256:{:064x}", n)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Blob { repo: String, digest: String },
    Manifest { repo: String, reference: String },
}

#[derive(Default)]
struct Repository {
    manifests: HashMap<String, (Vec<u8>, String)>,
    tags: Vec<String>,
    blobs: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct State {
    repos: HashMap<String, Repository>,
    events: Vec<Event>,
    blob_reads: usize,
}

/// Registry holding every repository of every host, keyed `host/repo`
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_manifest(&self, repo: &str, reference: &str, body: &[u8], media_type: &str) {
        let mut state = self.state.lock().unwrap();
        let repository = state.repos.entry(repo.to_string()).or_default();
        repository
            .manifests
            .insert(reference.to_string(), (body.to_vec(), media_type.to_string()));
        if !reference.starts_with("sha256:") && !repository.tags.iter().any(|t| t == reference) {
            repository.tags.push(reference.to_string());
        }
    }

    pub fn add_blob(&self, repo: &str, digest: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state
            .repos
            .entry(repo.to_string())
            .or_default()
            .blobs
            .insert(digest.to_string(), data.to_vec());
    }

    pub fn manifest(&self, repo: &str, reference: &str) -> Option<(Vec<u8>, String)> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(repo)
            .and_then(|repository| repository.manifests.get(reference).cloned())
    }

    pub fn blob(&self, repo: &str, digest: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(repo)
            .and_then(|repository| repository.blobs.get(digest).cloned())
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn blob_uploads(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Blob { .. }))
            .count()
    }

    pub fn manifest_writes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Manifest { reference, .. } => Some(reference),
                Event::Blob { .. } => None,
            })
            .collect()
    }

    pub fn blob_reads(&self) -> usize {
        self.state.lock().unwrap().blob_reads
    }

    pub fn connector(&self) -> Arc<dyn RegistryConnector> {
        Arc::new(self.clone())
    }

    fn endpoint(&self, image: &ImageInfo) -> Endpoint {
        Endpoint {
            registry: self.clone(),
            repo: format!("{}/{}", image.registry, image.repo()),
            reference: image.tag_or_digest.clone(),
        }
    }
}

#[async_trait]
impl RegistryConnector for MemoryRegistry {
    async fn source(&self, image: &ImageInfo, _auth: &Auth) -> Result<Arc<dyn ImageSource>> {
        Ok(Arc::new(self.endpoint(image)))
    }

    async fn destination(
        &self,
        image: &ImageInfo,
        _auth: &Auth,
    ) -> Result<Arc<dyn ImageDestination>> {
        Ok(Arc::new(self.endpoint(image)))
    }
}

struct Endpoint {
    registry: MemoryRegistry,
    repo: String,
    reference: String,
}

impl Endpoint {
    fn not_found(&self, what: &str) -> SyncError {
        SyncError::Http {
            status: 404,
            operation: format!("get {}", what),
            message: format!("{} not found in {}", what, self.repo),
        }
    }
}

#[async_trait]
impl ImageSource for Endpoint {
    async fn get_manifest(&self, digest: Option<&str>) -> Result<(Vec<u8>, String)> {
        let reference = digest.unwrap_or(&self.reference);
        self.registry
            .manifest(&self.repo, reference)
            .ok_or_else(|| self.not_found(reference))
    }

    async fn get_tags(&self) -> Result<Vec<String>> {
        let state = self.registry.state.lock().unwrap();
        Ok(state
            .repos
            .get(&self.repo)
            .map(|repository| repository.tags.clone())
            .unwrap_or_default())
    }

    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobStream, Option<u64>)> {
        let data = self
            .registry
            .blob(&self.repo, &info.digest)
            .ok_or_else(|| self.not_found(&info.digest))?;
        self.registry.state.lock().unwrap().blob_reads += 1;

        let size = data.len() as u64;
        let chunks: Vec<Result<Bytes>> = data
            .chunks(4)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        let body: BlobStream = Box::pin(stream::iter(chunks));
        Ok((body, Some(size)))
    }
}

#[async_trait]
impl ImageDestination for Endpoint {
    async fn blob_exists(&self, info: &BlobInfo) -> Result<bool> {
        Ok(self.registry.blob(&self.repo, &info.digest).is_some())
    }

    async fn put_blob(&self, stream: BlobStream, info: &BlobInfo) -> Result<()> {
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        let data = chunks.concat();
        if let Some(size) = info.size {
            assert_eq!(size, data.len() as u64, "size mismatch for {}", info.digest);
        }
        self.registry.add_blob(&self.repo, &info.digest, &data);
        self.registry.state.lock().unwrap().events.push(Event::Blob {
            repo: self.repo.clone(),
            digest: info.digest.clone(),
        });
        Ok(())
    }

    async fn put_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        digest: Option<&str>,
    ) -> Result<()> {
        let reference = digest.unwrap_or(&self.reference).to_string();
        self.registry.add_manifest(&self.repo, &reference, bytes, media_type);
        self.registry.state.lock().unwrap().events.push(Event::Manifest {
            repo: self.repo.clone(),
            reference,
        });
        Ok(())
    }
}

/// Wraps a [`MemoryRegistry`] so that every registry call takes `delay` and
/// the number of calls in flight at once is recorded
#[derive(Clone)]
pub struct SlowRegistry {
    inner: MemoryRegistry,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl SlowRegistry {
    pub fn new(inner: &MemoryRegistry, delay: Duration) -> Self {
        Self {
            inner: inner.clone(),
            delay,
            in_flight: Arc::default(),
            peak: Arc::default(),
            calls: Arc::default(),
        }
    }

    /// Most calls ever in flight together
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> Arc<dyn RegistryConnector> {
        Arc::new(self.clone())
    }

    async fn io<T>(&self, operation: impl Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let output = operation.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        output
    }
}

#[async_trait]
impl RegistryConnector for SlowRegistry {
    async fn source(&self, image: &ImageInfo, auth: &Auth) -> Result<Arc<dyn ImageSource>> {
        let inner = self.io(self.inner.source(image, auth)).await?;
        Ok(Arc::new(SlowSource {
            registry: self.clone(),
            inner,
        }))
    }

    async fn destination(
        &self,
        image: &ImageInfo,
        auth: &Auth,
    ) -> Result<Arc<dyn ImageDestination>> {
        let inner = self.io(self.inner.destination(image, auth)).await?;
        Ok(Arc::new(SlowDestination {
            registry: self.clone(),
            inner,
        }))
    }
}

struct SlowSource {
    registry: SlowRegistry,
    inner: Arc<dyn ImageSource>,
}

#[async_trait]
impl ImageSource for SlowSource {
    async fn get_manifest(&self, digest: Option<&str>) -> Result<(Vec<u8>, String)> {
        self.registry.io(self.inner.get_manifest(digest)).await
    }

    async fn get_tags(&self) -> Result<Vec<String>> {
        self.registry.io(self.inner.get_tags()).await
    }

    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobStream, Option<u64>)> {
        self.registry.io(self.inner.get_blob(info)).await
    }
}

struct SlowDestination {
    registry: SlowRegistry,
    inner: Arc<dyn ImageDestination>,
}

#[async_trait]
impl ImageDestination for SlowDestination {
    async fn blob_exists(&self, info: &BlobInfo) -> Result<bool> {
        self.registry.io(self.inner.blob_exists(info)).await
    }

    async fn put_blob(&self, stream: BlobStream, info: &BlobInfo) -> Result<()> {
        self.registry.io(self.inner.put_blob(stream, info)).await
    }

    async fn put_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        digest: Option<&str>,
    ) -> Result<()> {
        self.registry
            .io(self.inner.put_manifest(bytes, media_type, digest))
            .await
    }
}

/// Single-platform image: one config blob plus `layers`
pub fn image_manifest(media_type: &str, config: (&str, &[u8]), layers: &[(&str, &[u8])]) -> Value {
    let (layer_type, config_type) = if media_type == OCI_MANIFEST {
        (
            "application/vnd.oci.image.layer.v1.tar+gzip",
            "application/vnd.oci.image.config.v1+json",
        )
    } else {
        (
            "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "application/vnd.docker.container.image.v1+json",
        )
    };
    json!({
        "schemaVersion": 2,
        "mediaType": media_type,
        "config": {
            "mediaType": config_type,
            "size": config.1.len(),
            "digest": config.0,
        },
        "layers": layers.iter().map(|(digest, data)| json!({
            "mediaType": layer_type,
            "size": data.len(),
            "digest": digest,
        })).collect::<Vec<_>>(),
    })
}

/// Manifest list referencing `(digest, size, arch)` children
pub fn manifest_list(media_type: &str, children: &[(&str, usize, &str)]) -> Value {
    let child_type = if media_type == OCI_INDEX {
        OCI_MANIFEST
    } else {
        DOCKER_V2_SCHEMA2
    };
    json!({
        "schemaVersion": 2,
        "mediaType": media_type,
        "manifests": children.iter().map(|(digest, size, arch)| json!({
            "mediaType": child_type,
            "size": size,
            "digest": digest,
            "platform": { "os": "linux", "architecture": arch },
        })).collect::<Vec<_>>(),
    })
}

/// Two-platform image seeded into `repo` under `tag`. Both platforms share
/// one base layer. Returns the child manifest digests in list order.
pub fn seed_multi_platform(registry: &MemoryRegistry, repo: &str, tag: &str) -> Vec<String> {
    let base = digest(1);
    registry.add_blob(repo, &base, b"base layer");

    let mut children = Vec::new();
    for (n, arch) in [(10u32, "amd64"), (20u32, "arm64")] {
        let config = digest(n);
        let layer = digest(n + 1);
        let config_data = format!("{{\"architecture\":\"{}\"}}", arch);
        let layer_data = format!("{} layer", arch);
        registry.add_blob(repo, &config, config_data.as_bytes());
        registry.add_blob(repo, &layer, layer_data.as_bytes());

        let layers: [(&str, &[u8]); 2] = [
            (base.as_str(), b"base layer".as_slice()),
            (layer.as_str(), layer_data.as_bytes()),
        ];
        let body = serde_json::to_vec(&image_manifest(
            DOCKER_V2_SCHEMA2,
            (config.as_str(), config_data.as_bytes()),
            &layers,
        ))
        .unwrap();
        let child = digest(n + 100);
        registry.add_manifest(repo, &child, &body, DOCKER_V2_SCHEMA2);
        children.push((child, body.len(), arch));
    }

    let list = manifest_list(
        DOCKER_V2_LIST,
        &children
            .iter()
            .map(|(d, size, arch)| (d.as_str(), *size, *arch))
            .collect::<Vec<_>>(),
    );
    // pretty-printed so the raw bytes differ from a re-serialization
    let body = serde_json::to_vec_pretty(&list).unwrap();
    registry.add_manifest(repo, tag, &body, DOCKER_V2_LIST);

    children.into_iter().map(|(d, _, _)| d).collect()
}

/// Single-platform image seeded into `repo` under `tag`
pub fn seed_single_platform(registry: &MemoryRegistry, repo: &str, tag: &str, n: u32) {
    let config = digest(n);
    let layer = digest(n + 1);
    registry.add_blob(repo, &config, b"{}");
    registry.add_blob(repo, &layer, tag.as_bytes());
    let layers: [(&str, &[u8]); 1] = [(layer.as_str(), tag.as_bytes())];
    let body = serde_json::to_vec(&image_manifest(
        OCI_MANIFEST,
        (config.as_str(), b"{}".as_slice()),
        &layers,
    ))
    .unwrap();
    registry.add_manifest(repo, tag, &body, OCI_MANIFEST);
}

/// OCI index whose first child is itself an index of two platforms and whose
/// second child is a plain image. Returns `(inner index, inner leaves, outer
/// leaf)` digests.
pub fn seed_nested_index(registry: &MemoryRegistry, repo: &str, tag: &str) -> (String, Vec<String>, String) {
    let leaf = |n: u32, arch: &str| {
        let config = digest(n);
        let layer = digest(n + 1);
        let layer_data = format!("{} layer", arch);
        registry.add_blob(repo, &config, b"{}");
        registry.add_blob(repo, &layer, layer_data.as_bytes());
        let layers: [(&str, &[u8]); 1] = [(layer.as_str(), layer_data.as_bytes())];
        let body = serde_json::to_vec(&image_manifest(
            OCI_MANIFEST,
            (config.as_str(), b"{}".as_slice()),
            &layers,
        ))
        .unwrap();
        let child = digest(n + 100);
        registry.add_manifest(repo, &child, &body, OCI_MANIFEST);
        (child, body.len())
    };

    let (amd64, amd64_size) = leaf(310, "amd64");
    let (arm64, arm64_size) = leaf(320, "arm64");
    let (s390x, s390x_size) = leaf(330, "s390x");

    let inner_body = serde_json::to_vec(&manifest_list(
        OCI_INDEX,
        &[(amd64.as_str(), amd64_size, "amd64"), (arm64.as_str(), arm64_size, "arm64")],
    ))
    .unwrap();
    let inner = digest(300);
    registry.add_manifest(repo, &inner, &inner_body, OCI_INDEX);

    let outer = json!({
        "schemaVersion": 2,
        "mediaType": OCI_INDEX,
        "manifests": [
            { "mediaType": OCI_INDEX, "size": inner_body.len(), "digest": inner },
            {
                "mediaType": OCI_MANIFEST,
                "size": s390x_size,
                "digest": s390x,
                "platform": { "os": "linux", "architecture": "s390x" },
            },
        ],
    });
    registry.add_manifest(repo, tag, &serde_json::to_vec(&outer).unwrap(), OCI_INDEX);

    (inner, vec![amd64, arm64], s390x)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCall {
    VerifyHost { host: String, port: u16 },
    Clone { url: String, auth: GitAuth, dir: PathBuf },
    Push { url: String, auth: GitAuth, dir: PathBuf, refspecs: Vec<String> },
}

/// Git transport that records calls and creates the clone directory
#[derive(Default)]
pub struct FakeGit {
    calls: Mutex<Vec<GitCall>>,
    clone_failures: Mutex<usize>,
    up_to_date: bool,
    dir_present_at_push: Mutex<Vec<bool>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up_to_date() -> Self {
        Self {
            up_to_date: true,
            ..Self::default()
        }
    }

    /// Fail the first `n` clones
    pub fn failing_clones(n: usize) -> Self {
        Self {
            clone_failures: Mutex::new(n),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<GitCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn dir_present_at_push(&self) -> Vec<bool> {
        self.dir_present_at_push.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitTransport for FakeGit {
    async fn verify_host(&self, host: &str, port: u16) {
        self.calls.lock().unwrap().push(GitCall::VerifyHost {
            host: host.to_string(),
            port,
        });
    }

    async fn clone_mirror(&self, url: &str, auth: &GitAuth, dir: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(GitCall::Clone {
            url: url.to_string(),
            auth: auth.clone(),
            dir: dir.to_path_buf(),
        });
        {
            let mut failures = self.clone_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SyncError::Transport("connection reset by peer".to_string()));
            }
        }
        std::fs::create_dir_all(dir.join("refs"))?;
        Ok(())
    }

    async fn push(
        &self,
        dir: &Path,
        url: &str,
        auth: &GitAuth,
        refspecs: &[&str],
    ) -> Result<PushOutcome> {
        self.dir_present_at_push.lock().unwrap().push(dir.exists());
        self.calls.lock().unwrap().push(GitCall::Push {
            url: url.to_string(),
            auth: auth.clone(),
            dir: dir.to_path_buf(),
            refspecs: refspecs.iter().map(|s| s.to_string()).collect(),
        });
        if self.up_to_date {
            Ok(PushOutcome::AlreadyUpToDate)
        } else {
            Ok(PushOutcome::Pushed)
        }
    }
}
