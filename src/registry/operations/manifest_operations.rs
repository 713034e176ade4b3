//! Manifest operations for registry client
//!
//! - Manifest download (GET /v2/{name}/manifests/{reference}) with an Accept
//!   list covering Docker schema 1/2, manifest lists and OCI manifests/indices
//! - Manifest upload (PUT /v2/{name}/manifests/{reference})

use crate::error::Result;
use crate::image::manifest::{ACCEPTED_MEDIA_TYPES, guess_media_type};
use crate::registry::client::RegistryClient;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

#[derive(Debug, Clone)]
pub struct ManifestOperations {
    client: RegistryClient,
}

impl ManifestOperations {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Raw manifest bytes and their media type
    pub async fn get_manifest(&self, reference: &str) -> Result<(Vec<u8>, String)> {
        let url = self.client.url(&format!("manifests/{}", reference));
        self.client
            .logger()
            .trace(&format!("Fetching manifest: {}", url));

        let accept = ACCEPTED_MEDIA_TYPES.join(", ");
        let response = self
            .client
            .execute_with_retry(|client| {
                client
                    .request(Method::GET, &url)
                    .header(ACCEPT, accept.as_str())
            })
            .await?;

        if !response.status().is_success() {
            return Err(RegistryClient::status_error(
                response,
                format!("manifest fetch {}:{}", self.client.repository(), reference),
            )
            .await);
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_string())
            .unwrap_or_default();

        let bytes = response.bytes().await?.to_vec();

        let media_type = if ACCEPTED_MEDIA_TYPES.contains(&declared.as_str()) {
            declared
        } else {
            // generic content types such as application/json
            guess_media_type(&bytes)
                .map(str::to_string)
                .unwrap_or(declared)
        };

        Ok((bytes, media_type))
    }

    pub async fn put_manifest(&self, reference: &str, bytes: &[u8], media_type: &str) -> Result<()> {
        let url = self.client.url(&format!("manifests/{}", reference));

        self.client.logger().verbose(&format!(
            "Uploading manifest with content-type: {}",
            media_type
        ));

        let response = self
            .client
            .execute_with_retry(|client| {
                client
                    .request(Method::PUT, &url)
                    .header(CONTENT_TYPE, media_type)
                    .body(bytes.to_vec())
            })
            .await?;

        if response.status().is_success() {
            self.client.logger().verbose(&format!(
                "Manifest uploaded successfully for {}:{}",
                self.client.repository(),
                reference
            ));
            Ok(())
        } else {
            Err(RegistryClient::status_error(
                response,
                format!("manifest upload {}:{}", self.client.repository(), reference),
            )
            .await)
        }
    }
}
