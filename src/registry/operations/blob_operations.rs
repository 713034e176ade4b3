//! Blob operations for registry client
//!
//! Implements Docker Registry v2 blob operations:
//! - Blob existence checks (HEAD /v2/{name}/blobs/{digest})
//! - Streaming blob download (GET /v2/{name}/blobs/{digest}), falling back to
//!   the descriptor's foreign URLs
//! - Monolithic upload (POST /v2/{name}/blobs/uploads/ then PUT ?digest=)

use crate::error::{Result, SyncError};
use crate::registry::client::RegistryClient;
use crate::registry::{BlobInfo, BlobStream};
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Method, Response, StatusCode};

#[derive(Debug, Clone)]
pub struct BlobOperations {
    client: RegistryClient,
}

impl BlobOperations {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// HEAD the blob. A size mismatch with a known size counts as absent.
    pub async fn blob_exists(&self, info: &BlobInfo) -> Result<bool> {
        let url = self.client.url(&format!("blobs/{}", info.digest));
        let response = self
            .client
            .execute_with_retry(|client| client.request(Method::HEAD, &url))
            .await?;

        match response.status() {
            StatusCode::OK => {
                let remote_size = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok());
                match (info.size, remote_size) {
                    (Some(expected), Some(actual)) if expected != actual => {
                        self.client.logger().warning(&format!(
                            "Blob {} exists with size {} instead of {}",
                            info.digest, actual, expected
                        ));
                        Ok(false)
                    }
                    _ => Ok(true),
                }
            }
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(RegistryClient::status_error(
                response,
                format!("blob existence check {}", info.digest),
            )
            .await),
        }
    }

    /// Open a streaming download of the blob
    pub async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobStream, Option<u64>)> {
        let url = self.client.url(&format!("blobs/{}", info.digest));
        let response = self
            .client
            .execute_with_retry(|client| client.request(Method::GET, &url))
            .await?;

        let response = if response.status().is_success() {
            response
        } else if response.status() == StatusCode::NOT_FOUND && !info.urls.is_empty() {
            self.get_foreign_blob(info).await?
        } else {
            return Err(RegistryClient::status_error(
                response,
                format!("blob download {}", info.digest),
            )
            .await);
        };

        let size = response.content_length();
        let stream = response.bytes_stream().map_err(SyncError::from);
        Ok((Box::pin(stream), size))
    }

    async fn get_foreign_blob(&self, info: &BlobInfo) -> Result<Response> {
        let mut last_error = None;
        for url in &info.urls {
            self.client
                .logger()
                .trace(&format!("Trying foreign blob url: {}", url));
            match self.client.anonymous_request(Method::GET, url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    last_error = Some(
                        RegistryClient::status_error(response, format!("blob download {}", url))
                            .await,
                    );
                }
                Err(err) => last_error = Some(err.into()),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SyncError::Transport(format!("no location serves blob {}", info.digest))
        }))
    }

    /// Upload a blob in one request
    pub async fn put_blob(&self, stream: BlobStream, info: &BlobInfo) -> Result<()> {
        let upload_url = self.client.url("blobs/uploads/");
        // the streamed PUT below cannot be replayed, so a stale token is
        // refreshed here on the session request
        let response = self
            .client
            .execute_with_retry(|client| client.request(Method::POST, &upload_url))
            .await?;
        if !response.status().is_success() {
            return Err(RegistryClient::status_error(
                response,
                format!("blob upload session {}", info.digest),
            )
            .await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                SyncError::Transport("Missing Location header in upload response".to_string())
            })?;

        // Location may be absolute or relative to the registry
        let mut target = url::Url::parse(self.client.address())?.join(location)?;
        target.query_pairs_mut().append_pair("digest", &info.digest);

        self.client
            .logger()
            .trace(&format!("Uploading blob {} to {}", info.digest, target));

        let mut request = self
            .client
            .request(Method::PUT, target.as_str())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(stream));
        if let Some(size) = info.size {
            request = request.header(CONTENT_LENGTH, size);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryClient::status_error(
                response,
                format!("blob upload {}", info.digest),
            )
            .await)
        }
    }
}
