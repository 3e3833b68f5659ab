//! In-memory store for tests and dry-runs.
//!
//! This provides a [`StorageClient`] backed by a `HashMap` per bucket, removing the need for
//! tempdir management in tests. The store is [`Clone`] so tests can hold a handle for direct
//! inspection while a [`ClientPool`](crate::ClientPool) owns another.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt};

use crate::client::{GetOptions, ObjectInfo, StatOptions, StorageClient, clamp_range};
use crate::error::{Result, StorageError};
use crate::stream::PayloadStream;

/// Size of the chunks a download is split into.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
struct StoredObject {
    content_type: String,
    payload: Bytes,
}

type Buckets = HashMap<String, BTreeMap<String, StoredObject>>;

/// A [`StorageClient`] keeping all objects in memory.
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    endpoint: String,
    buckets: Arc<Mutex<Buckets>>,
}

impl InMemoryStore {
    /// Creates an empty store reporting the given endpoint name.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            buckets: Default::default(),
        }
    }

    /// Returns another handle on the same objects that reports a different endpoint.
    ///
    /// Lets several endpoints of a [`ClientPool`](crate::ClientPool) serve one dataset.
    pub fn with_endpoint(&self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            buckets: Arc::clone(&self.buckets),
        }
    }

    /// Returns the number of objects stored in the bucket.
    pub fn len(&self, bucket: &str) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map_or(0, BTreeMap::len)
    }

    /// Returns `true` if the bucket is missing or holds no objects.
    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }

    /// Returns `true` if the bucket contains an object with the given name.
    pub fn contains(&self, bucket: &str, name: &str) -> bool {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(name))
    }

    /// Returns a copy of the stored payload, if present.
    pub fn get_stored(&self, bucket: &str, name: &str) -> Option<Bytes> {
        let buckets = self.buckets.lock().unwrap();
        let object = buckets.get(bucket)?.get(name)?;
        Some(object.payload.clone())
    }

    /// Inserts an object directly, bypassing the [`StorageClient`] trait.
    ///
    /// Creates the bucket if needed. Useful for seeding leftovers that a benchmark should clean.
    pub fn insert(&self, bucket: &str, name: &str, payload: impl Into<Bytes>) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_owned())
            .or_default()
            .insert(
                name.to_owned(),
                StoredObject {
                    content_type: crate::DEFAULT_CONTENT_TYPE.to_owned(),
                    payload: payload.into(),
                },
            );
    }

    fn with_bucket<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut BTreeMap<String, StoredObject>) -> Result<T>,
    ) -> Result<T> {
        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::NoSuchBucket {
                bucket: bucket.to_owned(),
            })?;
        f(objects)
    }
}

fn not_found(bucket: &str, name: &str) -> StorageError {
    StorageError::NotFound {
        bucket: bucket.to_owned(),
        name: name.to_owned(),
    }
}

#[async_trait::async_trait]
impl StorageClient for InMemoryStore {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_owned())
            .or_default();
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        self.with_bucket(bucket, |objects| Ok(objects.keys().cloned().collect()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        payload: PayloadStream,
        _size: u64,
        content_type: &str,
    ) -> Result<u64> {
        // Fail early so the payload is not consumed for a missing bucket.
        self.with_bucket(bucket, |_| Ok(()))?;

        let payload: BytesMut = payload.try_collect().await?;
        let written = payload.len() as u64;
        let object = StoredObject {
            content_type: content_type.to_owned(),
            payload: payload.freeze(),
        };

        self.with_bucket(bucket, |objects| {
            objects.insert(name.to_owned(), object);
            Ok(written)
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        name: &str,
        options: &GetOptions,
    ) -> Result<PayloadStream> {
        let mut payload = self.with_bucket(bucket, |objects| {
            let object = objects.get(name).ok_or_else(|| not_found(bucket, name))?;
            Ok(object.payload.clone())
        })?;

        if let Some(range) = &options.range {
            let range = clamp_range(range, payload.len() as u64);
            payload = payload.slice(range.start as usize..range.end as usize);
        }

        let chunks: Vec<_> = (0..payload.len())
            .step_by(CHUNK_SIZE)
            .map(|start| {
                let end = (start + CHUNK_SIZE).min(payload.len());
                Ok(payload.slice(start..end))
            })
            .collect();

        Ok(futures_util::stream::iter(chunks).boxed())
    }

    async fn stat_object(
        &self,
        bucket: &str,
        name: &str,
        _options: &StatOptions,
    ) -> Result<ObjectInfo> {
        self.with_bucket(bucket, |objects| {
            let object = objects.get(name).ok_or_else(|| not_found(bucket, name))?;
            Ok(ObjectInfo {
                name: name.to_owned(),
                size: object.payload.len() as u64,
                content_type: object.content_type.clone(),
            })
        })
    }

    async fn remove_object(&self, bucket: &str, name: &str) -> Result<()> {
        self.with_bucket(bucket, |objects| {
            objects
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found(bucket, name))
        })
    }
}
