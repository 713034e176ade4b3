//! Runner: load the config, build the task list and drain it

use crate::cli::args::{Cli, Command, CommonArgs, GitArgs, ImageArgs};
use crate::concurrency::ConcurrencyGate;
use crate::config::{SyncOptions, load_config_file};
use crate::error::Result;
use crate::git::{self, GitCli, GitConfig};
use crate::image::{self, ImageConfig};
use crate::logging::Logger;
use crate::registry::HttpRegistryConnector;
use crate::task::{Scheduler, SyncReport, TaskList};
use std::sync::Arc;

pub struct Runner {
    cli: Cli,
    logger: Logger,
}

impl Runner {
    pub fn new(cli: Cli) -> Self {
        let logger = if cli.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(cli.debug)
        };
        Self { cli, logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn kind(&self) -> &'static str {
        self.cli.command.kind()
    }

    /// Run the selected mode. Configuration errors surface before any task
    /// starts; task failures only become an error under `--strict`.
    pub async fn run(&self) -> Result<SyncReport> {
        self.logger.section(&format!("{} sync", self.kind()));

        let report = match &self.cli.command {
            Command::Image(args) => self.run_image(args).await?,
            Command::Git(args) => self.run_git(args).await?,
        };

        if self.cli.command.common().strict {
            report.into_result()
        } else {
            Ok(report)
        }
    }

    async fn run_image(&self, args: &ImageArgs) -> Result<SyncReport> {
        let config: ImageConfig = load_config_file(&args.common.config)?;
        let options = self.options(&args.common, config.options())?;

        let gate = options.gate()?;
        let connector = Arc::new(HttpRegistryConnector::new(self.logger.clone()));
        let tasks = image::generate_sync_task_list(&config, connector, &gate, &self.logger)?;

        self.drain(tasks, gate, &options).await
    }

    async fn run_git(&self, args: &GitArgs) -> Result<SyncReport> {
        let mut config: GitConfig = load_config_file(&args.common.config)?;
        if config.private_key_file.is_empty() {
            if let Some(path) = &args.private_key_file {
                config.private_key_file = path.to_string_lossy().into_owned();
            }
        }
        if !args.private_key_password.is_empty() {
            config.private_key_password = args.private_key_password.clone();
        }
        let options = self.options(&args.common, config.options())?;

        let gate = options.gate()?;
        let transport = Arc::new(GitCli::new(config.insecure_skip_tls, self.logger.clone()));
        let tasks = git::generate_sync_task_list(&config, transport, &gate, &self.logger)?;

        self.drain(tasks, gate, &options).await
    }

    fn options(&self, common: &CommonArgs, file: SyncOptions) -> Result<SyncOptions> {
        let options = common.apply(file);
        options.validate()?;
        self.logger.debug(&format!(
            "proc {}, retries {}, retry delay {}",
            options.proc,
            options.retries,
            self.logger.format_duration(options.retry_delay)
        ));
        Ok(options)
    }

    async fn drain(
        &self,
        tasks: TaskList,
        gate: ConcurrencyGate,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        self.logger
            .subsection(&format!("{} {} sync task(s)", tasks.len(), self.kind()));
        let scheduler = Scheduler::new(
            self.kind(),
            gate,
            options.retry_policy(),
            self.logger.clone(),
        );
        Ok(scheduler.run(&tasks).await)
    }
}
