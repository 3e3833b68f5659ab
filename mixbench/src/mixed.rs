//! The mixed benchmark: a weighted mixture of PUT, GET, STAT and DELETE against a live dataset.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use mixbench_storage::{GetOptions, StatOptions, StorageClient};
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::benchmark::{Benchmark, Common, StartGate, State};
use crate::collector::{Collector, OpSender};
use crate::distribution::{Distribution, MixedDistribution};
use crate::error::{Error, Result};
use crate::generator::{ByteSource, GeneratedObject, Object, Payload};
use crate::op::{OpType, Operation, Operations, PendingOperation};

/// Size of the chunks payloads are streamed to the store in.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Label of this benchmark in auto-termination logs.
const LABEL: &str = "MIXED";

/// Runs a mixture of operations against a dataset created during preparation.
#[derive(Debug)]
pub struct Mixed {
    common: Common,
    create_objects: usize,
    get_options: GetOptions,
    stat_options: StatOptions,
    dist: Arc<MixedDistribution>,
    collector: Option<Collector>,
    state: State,
}

impl Mixed {
    /// Creates the benchmark, validating the settings and building the operation schedule.
    ///
    /// Fails before anything touches the store if the distribution or settings are invalid.
    pub fn new(common: Common, create_objects: usize, distribution: Distribution) -> Result<Self> {
        common.validate()?;
        let uses_existing = [OpType::Get, OpType::Stat, OpType::Delete]
            .into_iter()
            .any(|op| distribution.weight(op) > 0.0);
        if create_objects == 0 && uses_existing {
            return Err(Error::Config(
                "at least one object must be created to GET, STAT or DELETE".into(),
            ));
        }

        let dist = MixedDistribution::generate(distribution, create_objects)?;
        Ok(Self {
            common,
            create_objects,
            get_options: GetOptions::default(),
            stat_options: StatOptions::default(),
            dist: Arc::new(dist),
            collector: None,
            state: State::Idle,
        })
    }

    /// Sets the options used for every GET.
    pub fn with_get_options(mut self, options: GetOptions) -> Self {
        self.get_options = options;
        self
    }

    /// Sets the options used for every STAT.
    pub fn with_stat_options(mut self, options: StatOptions) -> Self {
        self.stat_options = options;
        self
    }

    /// The operation schedule and live objects.
    pub fn distribution(&self) -> &MixedDistribution {
        &self.dist
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, allowed: &[State], next: State) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(Error::InvalidState {
                actual: self.state,
                next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    async fn upload_dataset(&mut self, token: &CancellationToken) -> Result<()> {
        self.common.create_empty_bucket(token).await?;
        tracing::info!(
            objects = self.create_objects,
            source = %self.common.generator,
            "uploading objects"
        );

        self.collector = Some(Collector::new());

        let claimed = Arc::new(AtomicUsize::new(0));
        let first_error = Arc::new(Mutex::new(None));
        let mut tasks = JoinSet::new();

        for worker in 0..self.common.concurrency {
            let common = self.common.clone();
            let dist = Arc::clone(&self.dist);
            let claimed = Arc::clone(&claimed);
            let first_error = Arc::clone(&first_error);
            let token = token.clone();
            let create_objects = self.create_objects;

            tasks.spawn(async move {
                let mut source = common.generator.source();
                while claimed.fetch_add(1, Ordering::Relaxed) < create_objects {
                    if token.is_cancelled() {
                        return;
                    }
                    let GeneratedObject { object, payload } = source.object();
                    let client = common.clients.acquire();
                    let result = upload(&*client, &common.bucket, &object, payload).await;
                    drop(client);

                    if let Err(err) = result {
                        tracing::error!(
                            worker,
                            error = &err as &dyn std::error::Error,
                            "upload error"
                        );
                        first_error.lock().unwrap().get_or_insert(err);
                        return;
                    }

                    tracing::trace!(worker, name = %object.name, "uploaded object");
                    dist.objects().add(object);
                    common.report_progress(dist.objects().len() as f64 / create_objects as f64);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined?;
        }

        match first_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Benchmark for Mixed {
    /// Empties the bucket and uploads the initial dataset.
    ///
    /// A worker that hits an upload error stops; the others keep uploading. The first error is
    /// returned once all workers are done.
    async fn prepare(&mut self, token: &CancellationToken) -> Result<()> {
        self.transition(&[State::Idle], State::Preparing)?;
        let result = self.upload_dataset(token).await;
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    async fn start(&mut self, token: CancellationToken, gate: StartGate) -> Result<Operations> {
        self.transition(&[State::Preparing], State::Running)?;

        let collector = self.collector.take().unwrap_or_default();
        let token = match &self.common.auto_term {
            Some(config) => collector.auto_term(&token, LABEL, config.clone()),
            None => token.child_token(),
        };

        let mut tasks = JoinSet::new();
        for thread in 0..self.common.concurrency {
            let worker = Worker {
                thread,
                source: self.common.generator.source(),
                common: self.common.clone(),
                dist: Arc::clone(&self.dist),
                get_options: self.get_options.clone(),
                stat_options: self.stat_options.clone(),
                sender: collector.sender(),
                token: token.clone(),
            };
            let gate = gate.clone();
            tasks.spawn(async move {
                if !gate.wait().await {
                    return Ok(());
                }
                worker.run().await
            });
        }
        drop(gate);

        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined.map_err(Error::from).and_then(|result| result) {
                tracing::error!(error = &err as &dyn std::error::Error, "worker aborted");
                token.cancel();
                fatal.get_or_insert(err);
            }
        }

        let ops = collector.close().await;
        match fatal {
            Some(err) => Err(err),
            None => Ok(ops),
        }
    }

    async fn cleanup(&mut self) {
        if self
            .transition(
                &[State::Idle, State::Preparing, State::Running, State::Failed],
                State::Cleaning,
            )
            .is_err()
        {
            tracing::warn!(state = %self.state, "cleanup skipped");
            return;
        }

        match self.common.delete_all_in_bucket(None).await {
            Ok((removed, 0)) => tracing::info!(removed, "bucket cleaned"),
            Ok((removed, failed)) => tracing::warn!(removed, failed, "bucket partially cleaned"),
            Err(err) => {
                tracing::error!(error = &err as &dyn std::error::Error, "cleanup failed")
            }
        }
        self.dist.objects().drain();
        self.state = State::Done;
    }

    fn common(&self) -> &Common {
        &self.common
    }
}

/// Streams a payload to the store and checks that all of it was written.
async fn upload(
    client: &dyn StorageClient,
    bucket: &str,
    object: &Object,
    payload: Payload,
) -> Result<()> {
    let stream = ReaderStream::with_capacity(payload, UPLOAD_CHUNK_SIZE).boxed();
    let written = client
        .put_object(bucket, &object.name, stream, object.size, &object.content_type)
        .await?;
    if written != object.size {
        return Err(Error::ShortUpload {
            want: object.size,
            got: written,
        });
    }
    Ok(())
}

/// Records an error on the operation and logs it.
fn record_error(op: &mut PendingOperation, op_type: OpType, err: impl std::error::Error + 'static) {
    tracing::error!(op = %op_type, error = &err as &dyn std::error::Error, "operation failed");
    op.fail(err);
}

struct Worker {
    thread: usize,
    source: ByteSource,
    common: Common,
    dist: Arc<MixedDistribution>,
    get_options: GetOptions,
    stat_options: StatOptions,
    sender: OpSender,
    token: CancellationToken,
}

impl Worker {
    /// Executes operations until cancelled.
    ///
    /// Returns an error only for defects that make continuing pointless, such as running out of
    /// objects.
    async fn run(mut self) -> Result<()> {
        while !self.token.is_cancelled() {
            let op = match self.dist.next_op() {
                OpType::Put => self.put().await,
                OpType::Get => self.get().await?,
                OpType::Stat => self.stat().await?,
                OpType::Delete => self.delete().await?,
            };
            self.sender.send(op);
            // Stores that never return `Pending` would otherwise starve the timers.
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn put(&mut self) -> Operation {
        let GeneratedObject { object, payload } = self.source.object();
        let client = self.common.clients.acquire();
        let mut op = Operation::start(
            OpType::Put,
            self.thread,
            &object.name,
            object.size,
            client.endpoint(),
        );

        if let Err(err) = upload(&*client, &self.common.bucket, &object, payload).await {
            record_error(&mut op, OpType::Put, err);
        }
        let op = op.finish();
        drop(client);

        if !op.is_err() {
            self.dist.objects().add(object);
        }
        op
    }

    async fn get(&mut self) -> Result<Operation> {
        let object = self.dist.objects().random()?;
        let client = self.common.clients.acquire();
        let mut op = Operation::start(
            OpType::Get,
            self.thread,
            &object.name,
            object.size,
            client.endpoint(),
        );

        let expected = match &self.get_options.range {
            Some(range) => {
                let start = range.start.min(object.size);
                range.end.clamp(start, object.size) - start
            }
            None => object.size,
        };

        match client
            .get_object(&self.common.bucket, &object.name, &self.get_options)
            .await
        {
            Ok(mut stream) => {
                let mut read = 0u64;
                while let Some(chunk) = stream.next().await {
                    op.mark_first_byte();
                    match chunk {
                        Ok(chunk) => read += chunk.len() as u64,
                        Err(err) => {
                            record_error(&mut op, OpType::Get, err);
                            break;
                        }
                    }
                }
                if !op.failed() && read != expected {
                    let err = Error::SizeMismatch {
                        op: OpType::Get,
                        want: expected,
                        got: read,
                    };
                    record_error(&mut op, OpType::Get, err);
                }
            }
            Err(err) => record_error(&mut op, OpType::Get, err),
        }

        Ok(op.finish())
    }

    async fn stat(&mut self) -> Result<Operation> {
        let object = self.dist.objects().random()?;
        let client = self.common.clients.acquire();
        let mut op = Operation::start(OpType::Stat, self.thread, &object.name, 0, client.endpoint());

        match client
            .stat_object(&self.common.bucket, &object.name, &self.stat_options)
            .await
        {
            Ok(info) if info.size != object.size => {
                let err = Error::SizeMismatch {
                    op: OpType::Stat,
                    want: object.size,
                    got: info.size,
                };
                record_error(&mut op, OpType::Stat, err);
            }
            Ok(_) => {}
            Err(err) => record_error(&mut op, OpType::Stat, err),
        }

        Ok(op.finish())
    }

    async fn delete(&mut self) -> Result<Operation> {
        let client = self.common.clients.acquire();
        let object = self.dist.objects().pop_random()?;
        let mut op = Operation::start(
            OpType::Delete,
            self.thread,
            &object.name,
            0,
            client.endpoint(),
        );

        if let Err(err) = client.remove_object(&self.common.bucket, &object.name).await {
            record_error(&mut op, OpType::Delete, err);
        }

        Ok(op.finish())
    }
}
