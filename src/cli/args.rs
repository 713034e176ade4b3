//! Command-line argument parsing

use crate::config::{DEFAULT_RETRIES, SyncOptions, default_proc};
use crate::task::Backoff;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for exponential retry delays
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "syncer")]
#[command(about = "Mirror git repositories and container images between hosts")]
#[command(version, author)]
pub struct Cli {
    /// Debug output
    #[arg(long = "debug", global = true, help = "Enable debug output")]
    pub debug: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "debug",
        help = "Only print warnings and errors"
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync container images between registries
    Image(ImageArgs),
    /// Mirror git repositories
    Git(GitArgs),
}

impl Command {
    /// Mode name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Image(_) => "image",
            Command::Git(_) => "git",
        }
    }

    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Image(args) => &args.common,
            Command::Git(args) => &args.common,
        }
    }
}

/// Flags shared by every sync mode
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long = "config", short = 'c', help = "Path to the YAML or JSON config file")]
    pub config: PathBuf,

    #[arg(
        long = "proc",
        short = 'p',
        default_value_t = default_proc(),
        help = "Maximum number of concurrent operations"
    )]
    pub proc: usize,

    #[arg(
        long = "retries",
        short = 'r',
        default_value_t = DEFAULT_RETRIES,
        help = "Attempts per task before it is marked failed"
    )]
    pub retries: usize,

    #[arg(
        long = "retry-delay-ms",
        default_value_t = 0,
        help = "Delay between attempts in milliseconds"
    )]
    pub retry_delay_ms: u64,

    #[arg(
        long = "exponential-backoff",
        help = "Double the retry delay after every failed attempt"
    )]
    pub exponential_backoff: bool,

    #[arg(long = "strict", help = "Exit non-zero when any task failed")]
    pub strict: bool,
}

impl CommonArgs {
    /// Merge flags over the config file values. A flag wins when it was
    /// moved off its default; otherwise the (already defaulted) file value
    /// stands.
    pub fn apply(&self, file: SyncOptions) -> SyncOptions {
        let proc = if self.proc != default_proc() {
            self.proc
        } else {
            file.proc
        };
        let retries = if self.retries != DEFAULT_RETRIES {
            self.retries
        } else {
            file.retries
        };
        let backoff = if self.exponential_backoff {
            Backoff::Exponential {
                max_delay: MAX_RETRY_DELAY,
            }
        } else {
            Backoff::Fixed
        };

        SyncOptions {
            proc,
            retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            backoff,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct GitArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(
        long = "private-key-file",
        help = "SSH private key, used when the config file sets none"
    )]
    pub private_key_file: Option<PathBuf>,

    #[arg(
        long = "private-key-password",
        default_value = "",
        help = "Passphrase of the SSH private key"
    )]
    pub private_key_password: String,
}
