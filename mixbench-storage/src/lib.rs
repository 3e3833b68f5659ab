//! The storage layer abstracts the object store a benchmark is driven against.
//!
//! Benchmarks only talk to [`StorageClient`] trait objects, checked out of a
//! [`ClientPool`] for the duration of a single operation. Two stores are
//! provided: [`InMemoryStore`] for tests and dry-runs, and [`LocalFs`] which
//! maps buckets to directories on the local filesystem.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod client;
mod error;
mod local_fs;
mod memory;
mod pool;
pub mod stream;

pub use client::{DEFAULT_CONTENT_TYPE, GetOptions, ObjectInfo, StatOptions, StorageClient};
pub use error::{Result, StorageError};
pub use local_fs::LocalFs;
pub use memory::InMemoryStore;
pub use pool::{ClientLease, ClientPool};
pub use stream::PayloadStream;
