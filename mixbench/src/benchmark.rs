//! Benchmark phases and the driver running them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use mixbench_storage::ClientPool;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::collector::AutoTerm;
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::op::Operations;

/// Receives the fraction of work completed during a preparation phase.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Lifecycle of a benchmark.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Nothing has run yet.
    Idle,
    /// The initial dataset is being uploaded, or has been uploaded.
    Preparing,
    /// Workers are executing the workload.
    Running,
    /// Objects are being removed from the bucket.
    Cleaning,
    /// Cleanup has finished.
    Done,
    /// Preparation failed; only cleanup may follow.
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::Preparing => "preparing",
            State::Running => "running",
            State::Cleaning => "cleaning",
            State::Done => "done",
            State::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Settings shared by all benchmarks.
#[derive(Clone)]
pub struct Common {
    /// Bucket all objects are written to.
    pub bucket: String,
    /// Number of concurrent workers per phase.
    pub concurrency: usize,
    /// Clients to the target store.
    pub clients: ClientPool,
    /// Source of object payloads.
    pub generator: Arc<Generator>,
    /// Stop the run once throughput stabilizes.
    pub auto_term: Option<AutoTerm>,
    /// Receives upload progress while preparing.
    pub prepare_progress: Option<ProgressFn>,
}

impl Common {
    /// Creates settings without auto-termination or progress reporting.
    pub fn new(
        bucket: impl Into<String>,
        concurrency: usize,
        clients: ClientPool,
        generator: Generator,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            concurrency,
            clients,
            generator: Arc::new(generator),
            auto_term: None,
            prepare_progress: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be > 0".into()));
        }
        if self.bucket.is_empty() {
            return Err(Error::Config("bucket name must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn report_progress(&self, fraction: f64) {
        if let Some(progress) = &self.prepare_progress {
            progress(fraction.clamp(0.0, 1.0));
        }
    }

    /// Creates the bucket if needed and removes everything in it.
    pub(crate) async fn create_empty_bucket(&self, token: &CancellationToken) -> Result<()> {
        let client = self.clients.acquire();
        client.make_bucket(&self.bucket).await?;
        drop(client);

        let (removed, failed) = self.delete_all_in_bucket(Some(token)).await?;
        if removed > 0 {
            tracing::info!(bucket = %self.bucket, removed, "removed existing objects");
        }
        if failed > 0 {
            return Err(Error::BucketNotEmpty {
                bucket: self.bucket.clone(),
                remaining: failed,
            });
        }
        Ok(())
    }

    /// Removes every object in the bucket, returning the number of removed and failed objects.
    ///
    /// Objects not yet removed when `token` is cancelled count as failed.
    pub(crate) async fn delete_all_in_bucket(
        &self,
        token: Option<&CancellationToken>,
    ) -> Result<(usize, usize)> {
        let names = self.clients.acquire().list_objects(&self.bucket).await?;
        let removed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        futures_util::stream::iter(names)
            .for_each_concurrent(self.concurrency.max(1), |name| {
                let (removed, failed) = (&removed, &failed);
                async move {
                    if token.is_some_and(CancellationToken::is_cancelled) {
                        failed.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    let client = self.clients.acquire();
                    match client.remove_object(&self.bucket, &name).await {
                        Ok(()) => {
                            removed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            tracing::error!(
                                %name,
                                error = &err as &dyn std::error::Error,
                                "delete error"
                            );
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        Ok((removed.into_inner(), failed.into_inner()))
    }
}

impl fmt::Debug for Common {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Common")
            .field("bucket", &self.bucket)
            .field("concurrency", &self.concurrency)
            .field("clients", &self.clients)
            .field("generator", &self.generator)
            .field("auto_term", &self.auto_term)
            .field("prepare_progress", &self.prepare_progress.is_some())
            .finish()
    }
}

/// Releases all workers waiting on the paired [`StartGate`]s.
#[derive(Debug)]
pub struct StartTrigger(watch::Sender<bool>);

impl StartTrigger {
    /// Opens the gate.
    pub fn release(self) {
        self.0.send_replace(true);
    }
}

/// Holds workers back until the benchmark is ready to time operations.
#[derive(Clone, Debug)]
pub struct StartGate(watch::Receiver<bool>);

impl StartGate {
    /// Waits until the gate opens.
    ///
    /// Returns `false` if the trigger was dropped without releasing the gate.
    pub async fn wait(mut self) -> bool {
        self.0.wait_for(|open| *open).await.is_ok()
    }
}

/// Creates a closed start gate and its trigger.
pub fn start_gate() -> (StartTrigger, StartGate) {
    let (tx, rx) = watch::channel(false);
    (StartTrigger(tx), StartGate(rx))
}

/// A benchmark driven through prepare, start and cleanup.
#[async_trait::async_trait]
pub trait Benchmark: fmt::Debug + Send {
    /// Creates the initial dataset.
    async fn prepare(&mut self, token: &CancellationToken) -> Result<()>;

    /// Runs the workload once `gate` opens and until `token` is cancelled.
    async fn start(&mut self, token: CancellationToken, gate: StartGate) -> Result<Operations>;

    /// Removes all objects from the bucket. Best-effort.
    ///
    /// Runs to completion even after the run was cancelled.
    async fn cleanup(&mut self);

    /// The shared settings of this benchmark.
    fn common(&self) -> &Common;
}

/// Options for [`run_benchmark`].
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// How long the workload runs, unless auto-termination or `token` stops it earlier.
    pub duration: Duration,
    /// Whether to clean the bucket afterwards.
    pub cleanup: bool,
}

/// Runs a benchmark through all of its phases.
///
/// Cleanup runs even if preparation or the workload fail or `token` is cancelled, unless disabled
/// in `options`.
pub async fn run_benchmark(
    bench: &mut dyn Benchmark,
    options: RunOptions,
    token: CancellationToken,
) -> Result<Operations> {
    tracing::info!(bucket = %bench.common().bucket, "preparing benchmark");
    if let Err(err) = bench.prepare(&token).await {
        tracing::error!(error = &err as &dyn std::error::Error, "preparation failed");
        if options.cleanup {
            bench.cleanup().await;
        }
        return Err(err);
    }

    let run_token = token.child_token();
    let (trigger, gate) = start_gate();
    let started = bench.start(run_token.clone(), gate);

    tracing::info!(duration = ?options.duration, "starting benchmark");
    trigger.release();
    let timer = tokio::spawn({
        let run_token = run_token.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(options.duration) => run_token.cancel(),
                _ = run_token.cancelled() => {}
            }
        }
    });

    let result = started.await;
    run_token.cancel();
    timer.await?;

    match &result {
        Ok(ops) => tracing::info!(operations = ops.len(), errors = ops.errors(), "benchmark done"),
        Err(err) => tracing::error!(error = err as &dyn std::error::Error, "benchmark failed"),
    }

    if options.cleanup {
        tracing::info!("cleaning up");
        bench.cleanup().await;
    }

    result
}
