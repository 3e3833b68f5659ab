//! Operation mix scheduling.
//!
//! A [`Distribution`] holds the relative weights of each [`OpType`]. [`MixedDistribution`]
//! materializes those weights into a fixed, shuffled sequence of operation types that all
//! workers consume round-robin through a single shared cursor.

use std::collections::BTreeMap;
use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::op::OpType;
use crate::pool::ObjectPool;

/// Number of slots in the materialized operation sequence.
pub const SEQUENCE_LEN: usize = 1000;

/// Seed for shuffling the operation sequence, fixed so that identical configurations produce
/// identical sequences.
pub const SEQUENCE_SEED: u64 = 0xABAD_1DEA;

/// Relative weights of operation types.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Distribution(BTreeMap<OpType, f64>);

impl Distribution {
    /// Creates an empty distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the weight of an operation type.
    pub fn with(mut self, op: OpType, weight: f64) -> Self {
        self.0.insert(op, weight);
        self
    }

    /// Returns the weight of an operation type, zero if unset.
    pub fn weight(&self, op: OpType) -> f64 {
        self.0.get(&op).copied().unwrap_or(0.0)
    }

    /// Iterates all operation types with their weights.
    pub fn iter(&self) -> impl Iterator<Item = (OpType, f64)> + '_ {
        self.0.iter().map(|(op, weight)| (*op, *weight))
    }

    /// Checks that no weight is negative, DELETE does not outweigh PUT, and some weight is set.
    pub fn validate(&self) -> Result<()> {
        if let Some((op, _)) = self.iter().find(|(_, weight)| *weight < 0.0 || weight.is_nan()) {
            return Err(Error::NegativeWeight { op });
        }

        let (delete, put) = (self.weight(OpType::Delete), self.weight(OpType::Put));
        if delete > put {
            return Err(Error::DeleteExceedsPut { delete, put });
        }

        let total: f64 = self.0.values().sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(Error::EmptyDistribution);
        }
        Ok(())
    }

    /// Validates the weights and scales them to sum up to 1.
    pub fn normalize(&mut self) -> Result<()> {
        self.validate()?;
        let total: f64 = self.0.values().sum();
        for weight in self.0.values_mut() {
            *weight /= total;
        }
        Ok(())
    }
}

impl FromIterator<(OpType, f64)> for Distribution {
    fn from_iter<T: IntoIterator<Item = (OpType, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The operation schedule and the live objects it operates on.
#[derive(Debug)]
pub struct MixedDistribution {
    distribution: Distribution,
    ops: Vec<OpType>,
    cursor: Mutex<usize>,
    objects: ObjectPool,
}

impl MixedDistribution {
    /// Validates and normalizes the distribution and builds the shuffled operation sequence.
    ///
    /// The object pool starts empty with room for `pool_size_hint` objects.
    pub fn generate(mut distribution: Distribution, pool_size_hint: usize) -> Result<Self> {
        distribution.normalize()?;

        let mut ops = Vec::with_capacity(SEQUENCE_LEN);
        for (op, weight) in distribution.iter() {
            let slots = (0.5 + weight * SEQUENCE_LEN as f64) as usize;
            ops.extend(std::iter::repeat_n(op, slots));
        }
        ops.shuffle(&mut StdRng::seed_from_u64(SEQUENCE_SEED));

        Ok(Self {
            distribution,
            ops,
            cursor: Mutex::new(0),
            objects: ObjectPool::with_capacity(pool_size_hint),
        })
    }

    /// Returns the next operation type in the sequence.
    pub fn next_op(&self) -> OpType {
        let mut cursor = self.cursor.lock().unwrap();
        let op = self.ops[*cursor];
        *cursor = (*cursor + 1) % self.ops.len();
        op
    }

    /// The normalized distribution.
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// The materialized operation sequence.
    pub fn sequence(&self) -> &[OpType] {
        &self.ops
    }

    /// The live objects.
    pub fn objects(&self) -> &ObjectPool {
        &self.objects
    }
}
