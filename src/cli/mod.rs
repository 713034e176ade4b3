//! Command line interface
//!
//! Argument parsing and the runner that wires config, task list and
//! scheduler together for the `image` and `git` modes.

pub mod args;
pub mod runner;

pub use args::{Cli, Command, CommonArgs, GitArgs, ImageArgs};
pub use runner::Runner;
