//! Repository operations for registry client
//!
//! Tag listing (GET /v2/{name}/tags/list), following `Link` pagination.

use crate::error::Result;
use crate::registry::client::RegistryClient;
use regex::Regex;
use reqwest::Method;
use reqwest::header::LINK;
use serde::Deserialize;
use std::sync::LazyLock;

static NEXT_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("valid link regex"));

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Target of a `Link: <...>; rel="next"` header
pub fn next_page(link: &str) -> Option<&str> {
    NEXT_LINK_RE
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[derive(Debug, Clone)]
pub struct RepositoryOperations {
    client: RegistryClient,
}

impl RepositoryOperations {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Every tag of the repository, across all pages
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        let base = url::Url::parse(self.client.address())?;
        let mut next = Some(self.client.url("tags/list"));
        let mut tags = Vec::new();

        while let Some(url) = next.take() {
            self.client
                .logger()
                .trace(&format!("Listing tags: {}", url));

            let response = self
                .client
                .execute_with_retry(|client| client.request(Method::GET, &url))
                .await?;
            if !response.status().is_success() {
                return Err(RegistryClient::status_error(
                    response,
                    format!("tag listing {}", self.client.repository()),
                )
                .await);
            }

            if let Some(link) = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_page)
            {
                next = Some(base.join(link)?.to_string());
            }

            let page: TagList = response.json().await?;
            tags.extend(page.tags.unwrap_or_default());
        }

        self.client.logger().verbose(&format!(
            "Found {} tags for repository {}",
            tags.len(),
            self.client.repository()
        ));
        Ok(tags)
    }
}
