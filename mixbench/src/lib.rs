//! A benchmark engine for object stores.
//!
//! The engine drives a mixed workload of PUT, GET, STAT and DELETE calls against a
//! [`StorageClient`](mixbench_storage::StorageClient). A run has three phases:
//!
//!  1. **Prepare** empties the target bucket and uploads an initial dataset.
//!  2. **Start** runs concurrent workers that pick operations from a fixed, shuffled schedule
//!     (see [`MixedDistribution`]) and record every call as an [`Operation`].
//!  3. **Cleanup** removes everything from the bucket.
//!
//! Payloads come from a [`Generator`], which serves partially compressible data from a bounded
//! circular buffer. Workers stop when the run is cancelled, or when a [`Collector`] observes
//! that throughput has stabilized.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod benchmark;
mod collector;
mod distribution;
mod error;
mod generator;
mod mixed;
mod op;
mod pool;

pub use benchmark::{
    Benchmark, Common, ProgressFn, RunOptions, StartGate, StartTrigger, State, run_benchmark,
    start_gate,
};
pub use collector::{AutoTerm, Collector, OpSender};
pub use distribution::{Distribution, MixedDistribution, SEQUENCE_LEN, SEQUENCE_SEED};
pub use error::{Error, Result};
pub use generator::{
    ByteSource, CONTENT_TYPE, DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_SIZE, GeneratedObject, Generator,
    GeneratorConfig, OBJECT_SUFFIX, Object, ObjectSize, Payload,
};
pub use mixed::Mixed;
pub use op::{OpType, Operation, Operations, PendingOperation};
pub use pool::ObjectPool;
