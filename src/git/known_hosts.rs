//! Best-effort SSH known-hosts registration
//!
//! Before an SSH clone or push the target host is looked up with
//! `ssh-keygen -F`. An unknown host is added with `ssh-keyscan`. Every failure
//! here is logged and swallowed; the git operation that follows reports the
//! real error if the host key is still missing.

use crate::logging::Logger;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::auth::DEFAULT_SSH_PORT;

/// `$SSH_KNOWN_HOSTS` entries, or `~/.ssh/known_hosts`
pub fn known_hosts_files() -> Vec<PathBuf> {
    if let Some(value) = std::env::var_os("SSH_KNOWN_HOSTS") {
        let files: Vec<PathBuf> = std::env::split_paths(&value)
            .filter(|path| !path.as_os_str().is_empty())
            .collect();
        if !files.is_empty() {
            return files;
        }
    }
    user_known_hosts().into_iter().collect()
}

fn user_known_hosts() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// Host pattern as written in known_hosts files
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

async fn is_known(pattern: &str, files: &[PathBuf], logger: &Logger) -> bool {
    for file in files.iter().filter(|file| file.exists()) {
        let output = Command::new("ssh-keygen")
            .arg("-F")
            .arg(pattern)
            .arg("-f")
            .arg(file)
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() && !output.stdout.is_empty() => return true,
            Ok(_) => {}
            Err(err) => {
                logger.warning(&format!("ssh-keygen lookup error: {}", err));
                return false;
            }
        }
    }
    false
}

/// Make sure `host:port` is in the user's known_hosts
pub async fn ensure_known_host(host: &str, port: u16, logger: &Logger) {
    let pattern = host_pattern(host, port);
    if is_known(&pattern, &known_hosts_files(), logger).await {
        logger.debug(&format!("{} is a known host", pattern));
        return;
    }

    logger.warning(&format!("{} is not a known host, ssh-keyscan", pattern));
    if let Err(err) = keyscan(host, port, logger).await {
        logger.warning(&format!("ssh-keyscan error: {}", err));
    }
}

async fn keyscan(host: &str, port: u16, logger: &Logger) -> std::io::Result<()> {
    let Some(target) = user_known_hosts() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "home directory not found",
        ));
    };

    let output = Command::new("ssh-keyscan")
        .arg("-p")
        .arg(port.to_string())
        .arg(host)
        .kill_on_drop(true)
        .output()
        .await?;
    logger.debug(&format!(
        "ssh-keyscan logs: {}",
        String::from_utf8_lossy(&output.stderr).trim()
    ));
    if output.stdout.is_empty() {
        return Err(std::io::Error::other(format!(
            "no host keys returned for {}:{}",
            host, port
        )));
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target)
        .await?;
    file.write_all(&output.stdout).await?;
    file.flush().await?;
    Ok(())
}
