//! Checkout of storage clients per operation.
//!
//! A [`ClientPool`] holds one client per endpoint. [`ClientPool::acquire`] hands out the client
//! with the fewest in-flight operations as a [`ClientLease`]; the lease is returned to the pool
//! when dropped, so every exit path of an operation releases what it acquired.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::StorageClient;
use crate::error::{Result, StorageError};

#[derive(Debug)]
struct Slot {
    client: Arc<dyn StorageClient>,
    in_flight: AtomicUsize,
}

#[derive(Debug)]
struct PoolInner {
    slots: Vec<Slot>,
    next: AtomicUsize,
}

/// Hands out storage clients, balancing operations across endpoints.
#[derive(Clone, Debug)]
pub struct ClientPool(Arc<PoolInner>);

impl ClientPool {
    /// Creates a pool with a single endpoint.
    pub fn single(client: impl StorageClient) -> Self {
        Self(Arc::new(PoolInner {
            slots: vec![Slot {
                client: Arc::new(client),
                in_flight: AtomicUsize::new(0),
            }],
            next: AtomicUsize::new(0),
        }))
    }

    /// Creates a pool serving the given clients.
    ///
    /// Returns [`StorageError::NoEndpoints`] if no client is given.
    pub fn from_clients(clients: impl IntoIterator<Item = Arc<dyn StorageClient>>) -> Result<Self> {
        let slots: Vec<_> = clients
            .into_iter()
            .map(|client| Slot {
                client,
                in_flight: AtomicUsize::new(0),
            })
            .collect();

        if slots.is_empty() {
            return Err(StorageError::NoEndpoints);
        }

        Ok(Self(Arc::new(PoolInner {
            slots,
            next: AtomicUsize::new(0),
        })))
    }

    /// Checks out the least busy client.
    ///
    /// Ties are broken round-robin, so a pool without load rotates through all endpoints.
    pub fn acquire(&self) -> ClientLease {
        let slots = &self.0.slots;
        let offset = self.0.next.fetch_add(1, Ordering::Relaxed);

        let index = (0..slots.len())
            .map(|i| (offset + i) % slots.len())
            .min_by_key(|&i| slots[i].in_flight.load(Ordering::Relaxed))
            .unwrap_or(0);

        slots[index].in_flight.fetch_add(1, Ordering::AcqRel);
        ClientLease {
            pool: Arc::clone(&self.0),
            index,
        }
    }

    /// Returns the number of leases currently held across all endpoints.
    pub fn in_flight(&self) -> usize {
        self.0
            .slots
            .iter()
            .map(|slot| slot.in_flight.load(Ordering::Acquire))
            .sum()
    }

    /// Returns the endpoints served by this pool.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.0.slots.iter().map(|slot| slot.client.endpoint())
    }
}

/// A client checked out of a [`ClientPool`].
///
/// Dereferences to the client. Dropping the lease releases it back to the pool.
#[derive(Debug)]
pub struct ClientLease {
    pool: Arc<PoolInner>,
    index: usize,
}

impl Deref for ClientLease {
    type Target = dyn StorageClient;

    fn deref(&self) -> &Self::Target {
        &*self.pool.slots[self.index].client
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        self.pool.slots[self.index]
            .in_flight
            .fetch_sub(1, Ordering::AcqRel);
    }
}
