//! A store that injects failures into an [`InMemoryStore`].
//!
//! ```
//! use mixbench_test::faulty::{Call, FaultyStore};
//!
//! let store = FaultyStore::new("faulty").fail_every(Call::Get, 3);
//! // every third GET now fails...
//!
//! let store = FaultyStore::new("faulty").truncate_gets_every(2);
//! // ...or every second GET returns half of the object
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use futures_util::TryStreamExt;
use mixbench_storage::stream::make_stream;
use mixbench_storage::{
    GetOptions, InMemoryStore, ObjectInfo, PayloadStream, Result, StatOptions, StorageClient,
    StorageError,
};

/// A method of [`StorageClient`] that faults can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Call {
    /// [`StorageClient::make_bucket`].
    MakeBucket,
    /// [`StorageClient::list_objects`].
    List,
    /// [`StorageClient::put_object`].
    Put,
    /// [`StorageClient::get_object`].
    Get,
    /// [`StorageClient::stat_object`].
    Stat,
    /// [`StorageClient::remove_object`].
    Remove,
}

#[derive(Clone, Copy, Debug)]
enum Fault {
    Error,
    ShortWrite,
    Truncate,
    WrongSize,
}

#[derive(Debug)]
struct Rule {
    every: usize,
    calls: usize,
    fault: Fault,
}

#[derive(Debug, Default)]
struct Faults {
    rules: Mutex<HashMap<Call, Rule>>,
    injected: AtomicUsize,
}

impl Faults {
    fn check(&self, call: Call) -> Option<Fault> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.get_mut(&call)?;
        rule.calls += 1;
        if rule.calls % rule.every != 0 {
            return None;
        }
        self.injected.fetch_add(1, Ordering::Relaxed);
        Some(rule.fault)
    }
}

/// A [`StorageClient`] that fails or corrupts every n-th call of a configured kind.
///
/// Calls that are not failed are served by an [`InMemoryStore`], which can be inspected through
/// [`inner`](Self::inner). The store is [`Clone`]; clones share both objects and fault counters.
#[derive(Clone, Debug)]
pub struct FaultyStore {
    inner: InMemoryStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    /// Creates a store without any faults.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            inner: InMemoryStore::new(endpoint),
            faults: Default::default(),
        }
    }

    /// Makes every `n`-th call of the given kind fail with an error.
    pub fn fail_every(self, call: Call, n: usize) -> Self {
        self.set_rule(call, n, Fault::Error)
    }

    /// Makes every `n`-th upload store only half of its payload.
    ///
    /// The upload reports the truncated byte count instead of failing.
    pub fn short_write_every(self, n: usize) -> Self {
        self.set_rule(Call::Put, n, Fault::ShortWrite)
    }

    /// Makes every `n`-th download return only the first half of the object.
    pub fn truncate_gets_every(self, n: usize) -> Self {
        self.set_rule(Call::Get, n, Fault::Truncate)
    }

    /// Makes every `n`-th STAT report a size one byte larger than stored.
    pub fn misreport_size_every(self, n: usize) -> Self {
        self.set_rule(Call::Stat, n, Fault::WrongSize)
    }

    /// Number of faults injected so far.
    pub fn injected(&self) -> usize {
        self.faults.injected.load(Ordering::Relaxed)
    }

    /// The store serving all calls that do not fail.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn set_rule(self, call: Call, every: usize, fault: Fault) -> Self {
        assert!(every > 0, "fault interval must be > 0");
        self.faults.rules.lock().unwrap().insert(
            call,
            Rule {
                every,
                calls: 0,
                fault,
            },
        );
        self
    }

    fn check(&self, call: Call) -> Result<Option<Fault>> {
        match self.faults.check(call) {
            Some(Fault::Error) => Err(StorageError::generic(
                format!("{call:?}"),
                "injected fault",
            )),
            fault => Ok(fault),
        }
    }
}

#[async_trait::async_trait]
impl StorageClient for FaultyStore {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.check(Call::MakeBucket)?;
        self.inner.make_bucket(bucket).await
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        self.check(Call::List)?;
        self.inner.list_objects(bucket).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        payload: PayloadStream,
        size: u64,
        content_type: &str,
    ) -> Result<u64> {
        let Some(Fault::ShortWrite) = self.check(Call::Put)? else {
            return (self.inner)
                .put_object(bucket, name, payload, size, content_type)
                .await;
        };

        let mut payload: BytesMut = payload.try_collect().await?;
        payload.truncate(payload.len() / 2);
        let truncated = make_stream(&payload);
        (self.inner)
            .put_object(bucket, name, truncated, payload.len() as u64, content_type)
            .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        name: &str,
        options: &GetOptions,
    ) -> Result<PayloadStream> {
        let fault = self.check(Call::Get)?;
        let stream = self.inner.get_object(bucket, name, options).await?;
        let Some(Fault::Truncate) = fault else {
            return Ok(stream);
        };

        let mut payload: BytesMut = stream.try_collect().await?;
        payload.truncate(payload.len() / 2);
        Ok(make_stream(&payload))
    }

    async fn stat_object(
        &self,
        bucket: &str,
        name: &str,
        options: &StatOptions,
    ) -> Result<ObjectInfo> {
        let fault = self.check(Call::Stat)?;
        let mut info = self.inner.stat_object(bucket, name, options).await?;
        if let Some(Fault::WrongSize) = fault {
            info.size += 1;
        }
        Ok(info)
    }

    async fn remove_object(&self, bucket: &str, name: &str) -> Result<()> {
        self.check(Call::Remove)?;
        self.inner.remove_object(bucket, name).await
    }
}
