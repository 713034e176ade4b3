//! Manifest formats understood by the image sync
//!
//! Docker schema 1 (plain and signed), Docker schema 2, OCI image manifest,
//! Docker manifest list and OCI image index. Media-type strings are mapped
//! once onto [`MediaType`]; everything downstream matches on the variant.

use crate::error::{Result, SyncError};
use crate::registry::BlobInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub const DOCKER_V2_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_V2_SCHEMA1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_V2_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_V2_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Every manifest media type, in `Accept` header preference order
pub const ACCEPTED_MEDIA_TYPES: [&str; 6] = [
    OCI_INDEX,
    DOCKER_V2_LIST,
    OCI_MANIFEST,
    DOCKER_V2_SCHEMA2,
    DOCKER_V2_SCHEMA1_SIGNED,
    DOCKER_V2_SCHEMA1,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Schema1 { signed: bool },
    Schema2,
    Oci1,
    Schema2List,
    Oci1Index,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Schema1 { signed: false } => DOCKER_V2_SCHEMA1,
            MediaType::Schema1 { signed: true } => DOCKER_V2_SCHEMA1_SIGNED,
            MediaType::Schema2 => DOCKER_V2_SCHEMA2,
            MediaType::Oci1 => OCI_MANIFEST,
            MediaType::Schema2List => DOCKER_V2_LIST,
            MediaType::Oci1Index => OCI_INDEX,
        }
    }

    /// Lists and indices reference other manifests instead of blobs
    pub fn is_index(&self) -> bool {
        matches!(self, MediaType::Schema2List | MediaType::Oci1Index)
    }
}

impl FromStr for MediaType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self> {
        // registries may append parameters, e.g. "; charset=utf-8"
        let bare = value.split(';').next().unwrap_or_default().trim();
        match bare {
            DOCKER_V2_SCHEMA1 => Ok(MediaType::Schema1 { signed: false }),
            DOCKER_V2_SCHEMA1_SIGNED => Ok(MediaType::Schema1 { signed: true }),
            DOCKER_V2_SCHEMA2 => Ok(MediaType::Schema2),
            OCI_MANIFEST => Ok(MediaType::Oci1),
            DOCKER_V2_LIST => Ok(MediaType::Schema2List),
            OCI_INDEX => Ok(MediaType::Oci1Index),
            _ => Err(SyncError::UnknownMediaType(value.to_string())),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer a media type from the manifest body, for registries that answer
/// with a generic `Content-Type`
pub fn guess_media_type(bytes: &[u8]) -> Option<&'static str> {
    let value: Value = serde_json::from_slice(bytes).ok()?;

    if let Some(declared) = value.get("mediaType").and_then(Value::as_str) {
        return MediaType::from_str(declared).ok().map(|m| m.as_str());
    }

    match value.get("schemaVersion").and_then(Value::as_u64)? {
        1 if value.get("signatures").is_some() => Some(DOCKER_V2_SCHEMA1_SIGNED),
        1 => Some(DOCKER_V2_SCHEMA1),
        2 if value.get("manifests").is_some() => Some(OCI_INDEX),
        2 if value.get("layers").is_some() => Some(OCI_MANIFEST),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Content descriptor: config, layer or child manifest reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Descriptor {
    pub fn blob_info(&self) -> BlobInfo {
        BlobInfo {
            digest: self.digest.clone(),
            size: (self.size > 0).then_some(self.size),
            urls: self.urls.clone(),
        }
    }
}

/// Docker schema 2 or OCI single-platform manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Docker manifest list or OCI image index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: String,
}

/// Docker schema 1 manifest, signed or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub fs_layers: Vec<FsLayer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Schema1(Schema1Manifest),
    Image(ImageManifest),
    Index(ManifestIndex),
}

impl Manifest {
    pub fn parse(bytes: &[u8], media_type: MediaType) -> Result<Self> {
        let decoded = match media_type {
            MediaType::Schema1 { .. } => serde_json::from_slice(bytes).map(Manifest::Schema1),
            MediaType::Schema2 | MediaType::Oci1 => {
                serde_json::from_slice(bytes).map(Manifest::Image)
            }
            MediaType::Schema2List | MediaType::Oci1Index => {
                serde_json::from_slice(bytes).map(Manifest::Index)
            }
        };
        decoded.map_err(|e| SyncError::ManifestDecode(format!("{} manifest: {}", media_type, e)))
    }

    /// Blobs referenced by a single-platform manifest: layers, then the
    /// config when it has a digest. Indices reference no blobs directly.
    pub fn blobs(&self) -> Vec<BlobInfo> {
        match self {
            Manifest::Schema1(manifest) => manifest
                .fs_layers
                .iter()
                .rev()
                .map(|layer| BlobInfo::new(&layer.blob_sum))
                .collect(),
            Manifest::Image(manifest) => {
                let mut blobs: Vec<BlobInfo> =
                    manifest.layers.iter().map(Descriptor::blob_info).collect();
                if !manifest.config.digest.is_empty() {
                    blobs.push(manifest.config.blob_info());
                }
                blobs
            }
            Manifest::Index(_) => Vec::new(),
        }
    }

    /// Child manifest references of an index; empty for leaves
    pub fn children(&self) -> &[Descriptor] {
        match self {
            Manifest::Index(index) => &index.manifests,
            _ => &[],
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Manifest::Schema1(manifest) => serde_json::to_vec(manifest)?,
            Manifest::Image(manifest) => serde_json::to_vec(manifest)?,
            Manifest::Index(manifest) => serde_json::to_vec(manifest)?,
        };
        Ok(bytes)
    }
}
