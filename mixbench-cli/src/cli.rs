use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};
use mixbench::{Common, Generator, Mixed, RunOptions, run_benchmark};
use mixbench_storage::{ClientPool, InMemoryStore, LocalFs, StorageClient};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Endpoints, Storage};
use crate::{observability, report};

/// Mixed workload benchmark for object stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Version(VersionCommand),
}

/// run the mixed benchmark and print a summary
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// print the mixbench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => run(config).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

/// Creates one client per configured endpoint.
///
/// Memory endpoints share a single dataset.
async fn connect(endpoints: &Endpoints) -> Result<ClientPool> {
    let memory = InMemoryStore::new("memory");
    let stores = endpoints.stores();

    let mut clients = Vec::with_capacity(stores.len());
    for (index, storage) in stores.iter().enumerate() {
        let client: Arc<dyn StorageClient> = match storage {
            Storage::Memory if stores.len() == 1 => Arc::new(memory.clone()),
            Storage::Memory => Arc::new(memory.with_endpoint(format!("memory-{index}"))),
            Storage::FileSystem { path } => {
                tokio::fs::create_dir_all(path)
                    .await
                    .with_context(|| format!("failed to create {}", path.display()))?;
                Arc::new(LocalFs::new(path))
            }
        };
        tracing::debug!(endpoint = client.endpoint(), "connected");
        clients.push(client);
    }

    ClientPool::from_clients(clients).context("no storage endpoints configured")
}

async fn run(config: Config) -> Result<()> {
    let clients = connect(&config.storage).await?;

    let generator =
        Generator::new(config.generator_config()).context("invalid generator configuration")?;
    tracing::info!(%generator, "payload generator ready");

    let bar = ProgressBar::new(config.objects as u64)
        .with_message("Uploading objects...")
        .with_style(ProgressStyle::with_template(
            "{msg}\n{wide_bar} {pos}/{len}",
        )?);

    let mut common = Common::new(config.bucket.clone(), config.concurrency, clients, generator);
    common.auto_term = config.auto_term();
    common.prepare_progress = Some(Arc::new({
        let bar = bar.clone();
        let total = config.objects as f64;
        move |fraction| {
            bar.set_position((fraction * total).round() as u64);
            if fraction >= 1.0 {
                bar.finish_and_clear();
            }
        }
    }));

    let mut bench = Mixed::new(
        common,
        config.objects,
        config.distribution.to_distribution(),
    )
    .context("invalid benchmark configuration")?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping benchmark");
                token.cancel();
            }
        }
    });

    let options = RunOptions {
        duration: config.duration,
        cleanup: config.cleanup,
    };
    let result = run_benchmark(&mut bench, options, token).await;
    bar.finish_and_clear();

    let ops = result.context("benchmark failed")?;
    report::print_summary(&ops);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_to_every_endpoint() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("store");
        let endpoints = Endpoints::Multiple(vec![
            Storage::Memory,
            Storage::FileSystem { path: path.clone() },
            Storage::Memory,
        ]);

        let clients = connect(&endpoints).await.unwrap();
        let expected = format!("file://{}", path.display());
        assert_eq!(
            clients.endpoints().collect::<Vec<_>>(),
            ["memory-0", expected.as_str(), "memory-2"]
        );
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn empty_endpoint_list_is_rejected() {
        let result = connect(&Endpoints::Multiple(Vec::new())).await;
        assert!(result.is_err());
    }
}
