//! Git transport: mirror clone and forced push
//!
//! [`GitTransport`] is the seam the sync task talks to. [`GitCli`] drives the
//! `git` binary; credentials travel as an `http.extraHeader` or through
//! `GIT_SSH_COMMAND`, never inside the URL.

use super::auth::GitAuth;
use super::known_hosts;
use crate::error::{Result, SyncError};
use crate::logging::Logger;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;

/// Every ref namespace a mirror push overwrites
pub const MIRROR_REFSPECS: [&str; 3] = [
    "+refs/heads/*:refs/heads/*",
    "+refs/tags/*:refs/tags/*",
    "+refs/change/*:refs/change/*",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The destination already matched; not an error
    AlreadyUpToDate,
}

#[async_trait]
pub trait GitTransport: Send + Sync {
    /// Register an SSH host key if needed. Never fails.
    async fn verify_host(&self, host: &str, port: u16);

    /// Clone `url` as a bare mirror into `dir`
    async fn clone_mirror(&self, url: &str, auth: &GitAuth, dir: &Path) -> Result<()>;

    /// Force-push `refspecs` from the repository at `dir` to `url`
    async fn push(
        &self,
        dir: &Path,
        url: &str,
        auth: &GitAuth,
        refspecs: &[&str],
    ) -> Result<PushOutcome>;
}

/// [`GitTransport`] backed by the `git` command line
#[derive(Debug, Clone)]
pub struct GitCli {
    insecure_skip_tls: bool,
    logger: Logger,
}

impl GitCli {
    pub fn new(insecure_skip_tls: bool, logger: Logger) -> Self {
        Self {
            insecure_skip_tls,
            logger,
        }
    }

    fn command(&self, auth: &GitAuth) -> Command {
        let mut command = Command::new("git");
        command.env("GIT_TERMINAL_PROMPT", "0").kill_on_drop(true);

        if self.insecure_skip_tls {
            command.args(["-c", "http.sslVerify=false"]);
        }

        match auth {
            GitAuth::Anonymous => {}
            GitAuth::Token(token) => {
                command
                    .arg("-c")
                    .arg(format!("http.extraHeader=Authorization: Bearer {}", token));
            }
            GitAuth::Basic { username, password } => {
                let encoded = BASE64.encode(format!("{}:{}", username, password));
                command
                    .arg("-c")
                    .arg(format!("http.extraHeader=Authorization: Basic {}", encoded));
            }
            GitAuth::Ssh {
                key_file,
                key_password,
            } => {
                if !key_password.is_empty() {
                    self.logger.warning(
                        "git CLI cannot unlock a protected key; load it into ssh-agent",
                    );
                }
                command.env(
                    "GIT_SSH_COMMAND",
                    format!(
                        "ssh -i '{}' -o IdentitiesOnly=yes -o BatchMode=yes",
                        key_file.display()
                    ),
                );
            }
        }
        command
    }

    async fn run(&self, mut command: Command, operation: &str) -> Result<Output> {
        let output = command.output().await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(SyncError::Transport(format!(
                "git {} failed ({}): {}",
                operation,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl GitTransport for GitCli {
    async fn verify_host(&self, host: &str, port: u16) {
        known_hosts::ensure_known_host(host, port, &self.logger).await;
    }

    async fn clone_mirror(&self, url: &str, auth: &GitAuth, dir: &Path) -> Result<()> {
        let mut command = self.command(auth);
        command.args(["clone", "--mirror", "--quiet", url]).arg(dir);
        self.run(command, "clone").await?;
        Ok(())
    }

    async fn push(
        &self,
        dir: &Path,
        url: &str,
        auth: &GitAuth,
        refspecs: &[&str],
    ) -> Result<PushOutcome> {
        let mut command = self.command(auth);
        command
            .arg("-C")
            .arg(dir)
            .args(["push", "--force", "--porcelain", url])
            .args(refspecs);

        let output = self.run(command, "push").await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        self.logger.trace(&format!("git push: {}", stdout.trim()));

        if is_up_to_date(&stdout, &stderr) {
            Ok(PushOutcome::AlreadyUpToDate)
        } else {
            Ok(PushOutcome::Pushed)
        }
    }
}

/// `Everything up-to-date`, or porcelain output where every ref line is `=`
fn is_up_to_date(stdout: &str, stderr: &str) -> bool {
    const UP_TO_DATE: &str = "Everything up-to-date";
    if stdout.contains(UP_TO_DATE) || stderr.contains(UP_TO_DATE) {
        return true;
    }
    let refs: Vec<&str> = stdout
        .lines()
        .filter(|line| line.starts_with(['+', '-', '*', '!', ' ', '=']))
        .collect();
    !refs.is_empty() && refs.iter().all(|line| line.starts_with('='))
}
