//! Image reference parsing
//!
//! Splits a free-form reference such as `nginx:latest`,
//! `registry.example.com/team/app@sha256:...` or `docker.io/library/redis`
//! into registry, namespace, project and tag-or-digest.

use crate::error::{Result, SyncError};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_NAMESPACE: &str = "library";

static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]{32,}$").expect("valid digest regex")
});

/// True when `value` has the `algorithm:hex` shape of a content digest
pub fn is_digest(value: &str) -> bool {
    DIGEST_RE.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub registry: String,
    pub namespace: String,
    pub project: String,
    /// Empty when the reference names neither a tag nor a digest
    pub tag_or_digest: String,
}

impl ImageInfo {
    /// Parse an image reference.
    ///
    /// The first of three `/`-separated segments is always the registry. With
    /// two segments the first is the registry only if it looks like a
    /// hostname (contains a dot), otherwise it is a namespace on the default
    /// registry. A bare project lands in `docker.io/library`.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SyncError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }

        let segments: Vec<&str> = reference.splitn(3, '/').collect();
        let last = segments[segments.len() - 1];

        let (project, tag_or_digest) = if let Some((project, digest)) = last.split_once('@') {
            (project, digest)
        } else if let Some((project, tag)) = last.split_once(':') {
            (project, tag)
        } else {
            (last, "")
        };

        let (registry, namespace) = match segments.as_slice() {
            [registry, namespace, _] => (registry.to_string(), namespace.to_string()),
            [first, _] if first.contains('.') => (first.to_string(), String::new()),
            [first, _] => (DEFAULT_REGISTRY.to_string(), first.to_string()),
            _ => (DEFAULT_REGISTRY.to_string(), DEFAULT_NAMESPACE.to_string()),
        };

        if registry.is_empty() || project.is_empty() {
            return Err(SyncError::InvalidReference(reference.to_string()));
        }

        Ok(Self {
            registry,
            namespace,
            project: project.to_string(),
            tag_or_digest: tag_or_digest.to_string(),
        })
    }

    /// Repository path within the registry, `namespace/project` or `project`
    pub fn repo(&self) -> String {
        if self.namespace.is_empty() {
            self.project.clone()
        } else {
            format!("{}/{}", self.namespace, self.project)
        }
    }

    pub fn has_tag_or_digest(&self) -> bool {
        !self.tag_or_digest.is_empty()
    }

    pub fn is_digest(&self) -> bool {
        is_digest(&self.tag_or_digest)
    }

    /// Same repository, different tag or digest
    pub fn with_tag_or_digest(&self, tag_or_digest: &str) -> Self {
        Self {
            tag_or_digest: tag_or_digest.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repo())?;
        if self.tag_or_digest.is_empty() {
            Ok(())
        } else if self.is_digest() {
            write!(f, "@{}", self.tag_or_digest)
        } else {
            write!(f, ":{}", self.tag_or_digest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NGINX_DIGEST: &str =
        "sha256:1fd62556954250bac80d601a196bb7fd480ceba7c10e94dd8fd4c6d1c08783d5";

    fn info(registry: &str, namespace: &str, project: &str, tag: &str) -> ImageInfo {
        ImageInfo {
            registry: registry.to_string(),
            namespace: namespace.to_string(),
            project: project.to_string(),
            tag_or_digest: tag.to_string(),
        }
    }

    #[test]
    fn test_short_name_uses_docker_hub_library() {
        assert_eq!(
            ImageInfo::parse("nginx:latest").unwrap(),
            info("docker.io", "library", "nginx", "latest")
        );
    }

    #[test]
    fn test_dotted_first_segment_is_registry() {
        let parsed = ImageInfo::parse("registry.example.com/nginx").unwrap();
        assert_eq!(parsed, info("registry.example.com", "", "nginx", ""));
        assert!(!parsed.has_tag_or_digest());
        assert_eq!(parsed.repo(), "nginx");
    }

    #[test]
    fn test_undotted_first_segment_is_namespace() {
        let parsed = ImageInfo::parse("bitnami/redis:7.2").unwrap();
        assert_eq!(parsed, info("docker.io", "bitnami", "redis", "7.2"));
        assert_eq!(parsed.repo(), "bitnami/redis");
    }

    #[test]
    fn test_full_reference() {
        assert_eq!(
            ImageInfo::parse("docker.ac.cn/library/nginx:latest").unwrap(),
            info("docker.ac.cn", "library", "nginx", "latest")
        );
        assert_eq!(
            ImageInfo::parse("docker.ac.cn/library/nginx").unwrap(),
            info("docker.ac.cn", "library", "nginx", "")
        );
    }

    #[test]
    fn test_digest_reference() {
        let parsed = ImageInfo::parse(&format!("nginx@{}", NGINX_DIGEST)).unwrap();
        assert_eq!(parsed, info("docker.io", "library", "nginx", NGINX_DIGEST));
        assert!(parsed.is_digest());
        assert_eq!(
            parsed.to_string(),
            format!("docker.io/library/nginx@{}", NGINX_DIGEST)
        );
    }

    #[test]
    fn test_tag_is_not_a_digest() {
        assert!(!is_digest("latest"));
        assert!(!is_digest("v1.2.3"));
        assert!(is_digest(NGINX_DIGEST));
    }

    #[test]
    fn test_empty_reference_rejected() {
        assert!(ImageInfo::parse("").is_err());
        assert!(ImageInfo::parse("registry.example.com/").is_err());
    }
}
