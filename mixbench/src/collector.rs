//! Collection of measured operations and throughput-based auto-termination.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::op::{Operation, Operations};

/// Settings for stopping a run once throughput has stabilized.
#[derive(Clone, Debug)]
pub struct AutoTerm {
    /// Divisor applied to bytes per second before comparing samples.
    pub scale: f64,
    /// Maximum spread of the sampled throughput, relative to its mean.
    pub threshold: f64,
    /// Number of consecutive samples that must be within the threshold.
    pub samples: usize,
    /// Time between samples.
    pub interval: Duration,
    /// Stop the run after this long even if throughput never stabilizes.
    pub max_duration: Duration,
}

impl Default for AutoTerm {
    fn default() -> Self {
        Self {
            scale: 1.0,
            threshold: 0.075,
            samples: 10,
            interval: Duration::from_secs(1),
            max_duration: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    ops: AtomicU64,
    bytes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> (u64, u64) {
        (
            self.ops.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

/// Ingestion point for operations of one worker.
#[derive(Clone, Debug)]
pub struct OpSender(mpsc::UnboundedSender<Operation>);

impl OpSender {
    /// Hands an operation to the collector.
    pub fn send(&self, op: Operation) {
        if self.0.send(op).is_err() {
            tracing::warn!("collector closed, dropping operation");
        }
    }
}

/// Receives the operations of all workers.
#[derive(Debug)]
pub struct Collector {
    sender: OpSender,
    task: JoinHandle<Vec<Operation>>,
    counters: Arc<Counters>,
}

impl Collector {
    /// Creates a collector and spawns its ingestion task on the current runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Operation>();
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn({
            let counters = Arc::clone(&counters);
            async move {
                let mut ops = Vec::new();
                while let Some(op) = rx.recv().await {
                    counters.ops.fetch_add(1, Ordering::Relaxed);
                    if !op.is_err() {
                        counters.bytes.fetch_add(op.size, Ordering::Relaxed);
                    }
                    ops.push(op);
                }
                ops
            }
        });

        Self {
            sender: OpSender(tx),
            task,
            counters,
        }
    }

    /// Returns an ingestion point for one worker.
    pub fn sender(&self) -> OpSender {
        self.sender.clone()
    }

    /// Derives a token that is cancelled once throughput stabilizes or the maximum duration
    /// elapses, whichever comes first. Cancelling `token` cancels the derived token as well.
    pub fn auto_term(
        &self,
        token: &CancellationToken,
        label: &str,
        config: AutoTerm,
    ) -> CancellationToken {
        let child = token.child_token();
        let cancel = child.clone();
        let counters = Arc::clone(&self.counters);
        let label = label.to_owned();

        tokio::spawn(async move {
            let deadline = tokio::time::sleep(config.max_duration);
            tokio::pin!(deadline);

            let mut ticker = tokio::time::interval(config.interval);
            ticker.tick().await;

            let mut window = VecDeque::with_capacity(config.samples + 1);
            let mut last = counters.snapshot();
            let mut last_at = Instant::now();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = &mut deadline => {
                        tracing::info!(%label, "maximum duration reached, stopping");
                        cancel.cancel();
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let now = counters.snapshot();
                let elapsed = last_at.elapsed().as_secs_f64();
                last_at = Instant::now();
                let (ops, bytes) = (now.0 - last.0, now.1 - last.1);
                last = now;
                if elapsed <= 0.0 {
                    continue;
                }

                let sample = if bytes > 0 && config.scale > 0.0 {
                    bytes as f64 / config.scale / elapsed
                } else {
                    ops as f64 / elapsed
                };
                window.push_back(sample);
                if window.len() > config.samples {
                    window.pop_front();
                }

                if window.len() == config.samples && is_stable(&window, config.threshold) {
                    tracing::info!(%label, throughput = sample, "throughput stabilized, stopping");
                    cancel.cancel();
                    return;
                }
            }
        });

        child
    }

    /// Waits for all senders to be dropped and returns the operations ordered by start time.
    pub async fn close(self) -> Operations {
        drop(self.sender);
        match self.task.await {
            Ok(ops) => Operations::new(ops),
            Err(err) => {
                tracing::error!(error = &err as &dyn std::error::Error, "collector task failed");
                Operations::default()
            }
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `true` if all samples are within `threshold` of the mean, relative to the mean.
fn is_stable(samples: &VecDeque<f64>, threshold: f64) -> bool {
    if samples.is_empty() {
        return false;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if mean <= 0.0 {
        return false;
    }
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (max - min) <= threshold * mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpType;

    fn op(size: u64) -> Operation {
        Operation::start(OpType::Put, 0, "obj", size, "memory").finish()
    }

    #[test]
    fn stability_check() {
        assert!(!is_stable(&VecDeque::new(), 0.1));
        assert!(!is_stable(&[0.0, 0.0].into(), 0.1));
        assert!(is_stable(&[100.0, 105.0, 98.0].into(), 0.1));
        assert!(!is_stable(&[100.0, 150.0, 98.0].into(), 0.1));
    }

    #[tokio::test]
    async fn close_returns_all_operations() {
        let collector = Collector::new();
        let senders: Vec<_> = (0..3).map(|_| collector.sender()).collect();

        for (i, sender) in senders.iter().enumerate() {
            sender.send(op(i as u64));
        }
        drop(senders);

        let ops = collector.close().await;
        assert_eq!(ops.len(), 3);
        assert_eq!(ops.total_bytes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_term_stops_at_max_duration() {
        let collector = Collector::new();
        let token = CancellationToken::new();
        let config = AutoTerm {
            samples: 1000,
            max_duration: Duration::from_secs(5),
            ..Default::default()
        };

        let start = Instant::now();
        let child = collector.auto_term(&token, "TEST", config);
        child.cancelled().await;

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(!token.is_cancelled());
        collector.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auto_term_stops_on_stable_throughput() {
        let collector = Collector::new();
        let token = CancellationToken::new();
        let config = AutoTerm {
            samples: 5,
            threshold: 0.25,
            max_duration: Duration::from_secs(3600),
            ..Default::default()
        };
        let child = collector.auto_term(&token, "TEST", config);

        let sender = collector.sender();
        let feeder = tokio::spawn({
            let child = child.clone();
            async move {
                while !child.is_cancelled() {
                    for _ in 0..10 {
                        sender.send(op(100));
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        });

        let start = Instant::now();
        child.cancelled().await;
        feeder.await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(60));
        let ops = collector.close().await;
        assert!(ops.len() >= 400);
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let collector = Collector::new();
        let token = CancellationToken::new();
        let child = collector.auto_term(&token, "TEST", AutoTerm::default());

        token.cancel();
        child.cancelled().await;
        collector.close().await;
    }
}
