//! The `mixbench` command line tool.
//!
//! Runs a [`Mixed`](mixbench::Mixed) benchmark as described by the configuration and prints a
//! summary of the measured operations. See [`config`] for the available settings.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod cli;
pub mod config;
mod observability;
mod report;

fn main() -> anyhow::Result<()> {
    cli::execute()
}
