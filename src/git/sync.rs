//! Git sync task: mirror-clone the source, force-push every ref namespace to
//! the destination

use super::auth::{KeyConfig, ResolvedRepo, classify, repo_basename};
use super::config::GitConfig;
use super::transport::{GitTransport, MIRROR_REFSPECS, PushOutcome};
use crate::concurrency::ConcurrencyGate;
use crate::error::Result;
use crate::logging::Logger;
use crate::task::{self, Task, TaskList, task_name};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Transient clone directory. [`WorkDir::remove`] deletes it on the async
/// runtime; dropping it without that removes it synchronously.
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
    logger: Logger,
}

impl WorkDir {
    /// Reserve `{root}/{basename}-{uuid}`; the clone creates the directory
    pub fn new(root: &Path, basename: &str, logger: &Logger) -> Self {
        let path = root.join(format!("{}-{}", basename, uuid::Uuid::new_v4()));
        Self {
            path,
            removed: false,
            logger: logger.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) {
        self.removed = true;
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return;
        }
        self.logger.info(&format!("clean {}", self.path.display()));
        let result = tokio::fs::remove_dir_all(&self.path).await;
        self.report(result);
    }

    fn report(&self, result: std::io::Result<()>) {
        if let Err(err) = result {
            self.logger.warning(&format!(
                "failed to remove {}: {}",
                self.path.display(),
                err
            ));
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.removed || !self.path.exists() {
            return;
        }
        self.logger.info(&format!("clean {}", self.path.display()));
        let remove = || std::fs::remove_dir_all(&self.path);
        // block_in_place is only allowed on the multi-threaded runtime
        let result = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(remove)
            }
            _ => remove(),
        };
        self.report(result);
    }
}

pub struct GitSyncTask {
    name: String,
    source: String,
    destination: String,
    keys: KeyConfig,
    transport: Arc<dyn GitTransport>,
    gate: ConcurrencyGate,
    work_root: PathBuf,
    logger: Logger,
}

impl GitSyncTask {
    pub fn new(
        source: &str,
        destination: &str,
        keys: KeyConfig,
        transport: Arc<dyn GitTransport>,
        gate: ConcurrencyGate,
        logger: &Logger,
    ) -> Self {
        let name = task_name(source, destination);
        Self {
            logger: logger.with_context(&name),
            name,
            source: source.to_string(),
            destination: destination.to_string(),
            keys,
            transport,
            gate,
            work_root: std::env::temp_dir(),
        }
    }

    /// Clone into directories under `root` instead of the system temp dir
    pub fn with_work_root(mut self, root: &Path) -> Self {
        self.work_root = root.to_path_buf();
        self
    }

    /// Classify `url` and register the SSH host key when needed
    async fn resolve(&self, url: &str) -> Result<ResolvedRepo> {
        let resolved = classify(url, &self.keys)?;
        self.logger
            .debug(&format!("{} uses {:?}", resolved.url, resolved.auth));
        if let Some((host, port)) = resolved.ssh_target() {
            self.transport.verify_host(&host, port).await;
        }
        Ok(resolved)
    }

    /// Clone into `workdir` and push every ref to the destination
    async fn mirror(&self, source: &ResolvedRepo, workdir: &Path) -> Result<()> {
        self.logger.step(&format!(
            "clone {} to {}",
            source.url,
            workdir.display()
        ));
        self.transport
            .clone_mirror(&source.url, &source.auth, workdir)
            .await?;

        let destination = self.resolve(&self.destination).await?;
        self.logger.step(&format!("push to {}", destination.url));
        let outcome = self
            .transport
            .push(
                workdir,
                &destination.url,
                &destination.auth,
                &MIRROR_REFSPECS,
            )
            .await?;

        if outcome == PushOutcome::AlreadyUpToDate {
            self.logger
                .warning(&format!("{} is up to date", destination.url));
        }
        Ok(())
    }
}

#[async_trait]
impl Task for GitSyncTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        let _permit = self.gate.acquire().await?;

        let source = self.resolve(&self.source).await?;
        let workdir = WorkDir::new(
            &self.work_root,
            repo_basename(&source.url),
            &self.logger,
        );
        let result = self.mirror(&source, workdir.path()).await;
        workdir.remove().await;
        result
    }
}

/// One [`GitSyncTask`] per configured `(source, destination)` pair
pub fn generate_sync_task_list(
    config: &GitConfig,
    transport: Arc<dyn GitTransport>,
    gate: &ConcurrencyGate,
    logger: &Logger,
) -> Result<TaskList> {
    let keys = config.key_config();
    task::generate_task_list(&config.repos, logger, |source, destination| {
        Arc::new(GitSyncTask::new(
            source,
            destination,
            keys.clone(),
            Arc::clone(&transport),
            gate.clone(),
            logger,
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workdir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let workdir = WorkDir::new(root.path(), "repo.git", &Logger::new_quiet());
            std::fs::create_dir_all(workdir.path().join("objects")).unwrap();
            assert!(workdir.path().exists());
            workdir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_workdir_removed_on_runtime() {
        let root = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(root.path(), "repo.git", &Logger::new_quiet());
        let path = workdir.path().to_path_buf();
        tokio::fs::create_dir_all(path.join("refs/heads")).await.unwrap();

        workdir.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workdir_drop_inside_runtime() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let workdir = WorkDir::new(root.path(), "repo.git", &Logger::new_quiet());
            std::fs::create_dir_all(workdir.path().join("objects")).unwrap();
            workdir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_workdir_names_are_unique() {
        let root = Path::new("/tmp");
        let logger = Logger::new_quiet();
        let a = WorkDir::new(root, "repo.git", &logger);
        let b = WorkDir::new(root, "repo.git", &logger);
        assert_ne!(a.path(), b.path());
        assert!(a.path().file_name().unwrap().to_string_lossy().starts_with("repo.git-"));
    }
}
