//! HTTP API v2 registry client and the endpoint handles built on it
//!
//! [`RegistryClientBuilder`] resolves the registry address, configures TLS
//! and logs in for one repository. [`HttpRegistryConnector`] turns image
//! references into [`ImageSource`] / [`ImageDestination`] handles backed by
//! the blob, manifest and repository operations.

use super::auth::{Credential, RegistryAuth};
use super::operations::{BlobOperations, ManifestOperations, RepositoryOperations};
use super::{BlobInfo, BlobStream, ImageDestination, ImageSource, RegistryConnector};
use crate::error::{Result, SyncError};
use crate::image::{Auth, DEFAULT_NAMESPACE, DEFAULT_REGISTRY, ImageInfo};
use crate::logging::Logger;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::{Arc, PoisonError, RwLock};

const DOCKER_HUB_ADDRESS: &str = "https://registry-1.docker.io";

/// Repository path as the registry API expects it. Docker Hub keeps
/// official images under `library/`.
pub fn api_repository(address: &str, repository: &str) -> String {
    if address == DOCKER_HUB_ADDRESS && !repository.is_empty() && !repository.contains('/') {
        format!("{}/{}", DEFAULT_NAMESPACE, repository)
    } else {
        repository.to_string()
    }
}

/// Base URL for a registry host
pub fn registry_address(registry: &str) -> String {
    if registry == DEFAULT_REGISTRY || registry == "index.docker.io" {
        DOCKER_HUB_ADDRESS.to_string()
    } else if registry.starts_with("http://") || registry.starts_with("https://") {
        registry.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", registry)
    }
}

pub struct RegistryClientBuilder {
    registry: String,
    repository: String,
    auth: Auth,
    push: bool,
    logger: Logger,
}

impl RegistryClientBuilder {
    pub fn new(registry: &str) -> Self {
        Self {
            registry: registry.to_string(),
            repository: String::new(),
            auth: Auth::default(),
            push: false,
            logger: Logger::default(),
        }
    }

    pub fn with_repository(mut self, repository: &str) -> Self {
        self.repository = repository.to_string();
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Request push rights in addition to pull
    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub async fn build(self) -> Result<RegistryClient> {
        let mut builder = Client::builder().user_agent(concat!("syncer/", env!("CARGO_PKG_VERSION")));
        if self.auth.insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let http = builder.build()?;

        let address = registry_address(&self.registry);
        let repository = api_repository(&address, &self.repository);
        let actions = if self.push { "pull,push" } else { "pull" };
        let login = RegistryAuth::new(http.clone(), &address, self.logger.clone());
        let credential = login.login(&repository, actions, &self.auth).await?;

        self.logger.trace(&format!(
            "Logged in to {} for {} ({})",
            address, repository, actions
        ));

        Ok(RegistryClient {
            http,
            address,
            repository,
            actions: actions.to_string(),
            auth: self.auth,
            login,
            credential: Arc::new(RwLock::new(credential)),
            logger: self.logger,
        })
    }
}

/// Authenticated handle on one repository of one registry
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    address: String,
    repository: String,
    actions: String,
    auth: Auth,
    login: RegistryAuth,
    /// Shared by every operation built on this client, replaced on refresh
    credential: Arc<RwLock<Credential>>,
    logger: Logger,
}

impl RegistryClient {
    pub fn builder(registry: &str) -> RegistryClientBuilder {
        RegistryClientBuilder::new(registry)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// `{address}/v2/{repository}/{path}`
    pub fn url(&self, path: &str) -> String {
        format!("{}/v2/{}/{}", self.address, self.repository, path)
    }

    /// Start a request carrying this client's credential
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let credential = self
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        credential.apply(self.http.request(method, url))
    }

    /// Log in again with the same scope and swap in the new credential
    pub async fn refresh_credential(&self) -> Result<()> {
        let credential = self
            .login
            .login(&self.repository, &self.actions, &self.auth)
            .await?;
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credential;
        Ok(())
    }

    /// Send the request produced by `build`. On 401 the credential is
    /// refreshed once and the request rebuilt and sent again.
    pub async fn execute_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Self) -> RequestBuilder,
    {
        let response = build(self).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        self.logger
            .warning("Received 401 Unauthorized - attempting token refresh...");
        self.refresh_credential().await?;
        Ok(build(self).send().await?)
    }

    /// Plain request without registry credentials, for foreign blob URLs
    pub fn anonymous_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url)
    }

    pub(crate) async fn status_error(response: Response, operation: String) -> SyncError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        SyncError::Http {
            status,
            operation,
            message,
        }
    }
}

pub struct HttpImageSource {
    image: ImageInfo,
    manifests: ManifestOperations,
    repository: RepositoryOperations,
    blobs: BlobOperations,
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn get_manifest(&self, digest: Option<&str>) -> Result<(Vec<u8>, String)> {
        let reference = digest.unwrap_or(&self.image.tag_or_digest);
        if reference.is_empty() {
            return Err(SyncError::InvalidReference(format!(
                "{} has no tag or digest",
                self.image
            )));
        }
        self.manifests.get_manifest(reference).await
    }

    async fn get_tags(&self) -> Result<Vec<String>> {
        self.repository.list_tags().await
    }

    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobStream, Option<u64>)> {
        self.blobs.get_blob(info).await
    }
}

pub struct HttpImageDestination {
    image: ImageInfo,
    manifests: ManifestOperations,
    blobs: BlobOperations,
}

#[async_trait]
impl ImageDestination for HttpImageDestination {
    async fn blob_exists(&self, info: &BlobInfo) -> Result<bool> {
        self.blobs.blob_exists(info).await
    }

    async fn put_blob(&self, stream: BlobStream, info: &BlobInfo) -> Result<()> {
        self.blobs.put_blob(stream, info).await
    }

    async fn put_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        digest: Option<&str>,
    ) -> Result<()> {
        let reference = digest.unwrap_or(&self.image.tag_or_digest);
        if reference.is_empty() {
            return Err(SyncError::InvalidReference(format!(
                "{} has no tag or digest",
                self.image
            )));
        }
        self.manifests.put_manifest(reference, bytes, media_type).await
    }
}

/// [`RegistryConnector`] speaking the registry HTTP API v2
#[derive(Debug, Clone, Default)]
pub struct HttpRegistryConnector {
    logger: Logger,
}

impl HttpRegistryConnector {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    async fn client(&self, image: &ImageInfo, auth: &Auth, push: bool) -> Result<RegistryClient> {
        RegistryClient::builder(&image.registry)
            .with_repository(&image.repo())
            .with_auth(auth.clone())
            .with_push(push)
            .with_logger(self.logger.clone())
            .build()
            .await
    }
}

#[async_trait]
impl RegistryConnector for HttpRegistryConnector {
    async fn source(&self, image: &ImageInfo, auth: &Auth) -> Result<Arc<dyn ImageSource>> {
        let client = self.client(image, auth, false).await?;
        Ok(Arc::new(HttpImageSource {
            image: image.clone(),
            manifests: ManifestOperations::new(client.clone()),
            repository: RepositoryOperations::new(client.clone()),
            blobs: BlobOperations::new(client),
        }))
    }

    async fn destination(
        &self,
        image: &ImageInfo,
        auth: &Auth,
    ) -> Result<Arc<dyn ImageDestination>> {
        let client = self.client(image, auth, true).await?;
        Ok(Arc::new(HttpImageDestination {
            image: image.clone(),
            manifests: ManifestOperations::new(client.clone()),
            blobs: BlobOperations::new(client),
        }))
    }
}
