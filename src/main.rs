//! Syncer command line entry point

use clap::Parser;
use std::process;
use syncer::cli::{Cli, Runner};

#[tokio::main]
async fn main() {
    let runner = Runner::new(Cli::parse());

    if let Err(e) = runner.run().await {
        runner
            .logger()
            .error(&format!("run {} sync failed: {}", runner.kind(), e));
        process::exit(1);
    }
}
