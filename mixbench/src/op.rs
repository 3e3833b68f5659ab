//! Measured operations and their collection.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::Error;

/// The kind of storage call an [`Operation`] measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpType {
    /// Upload a new object.
    Put,
    /// Download an existing object.
    Get,
    /// Remove an existing object.
    Delete,
    /// Fetch metadata of an existing object.
    Stat,
}

impl OpType {
    /// All operation types.
    pub const ALL: [OpType; 4] = [OpType::Put, OpType::Get, OpType::Delete, OpType::Stat];

    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Put => "PUT",
            OpType::Get => "GET",
            OpType::Delete => "DELETE",
            OpType::Stat => "STAT",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpType::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownOperation(s.to_owned()))
    }
}

/// One measured storage call.
#[derive(Clone, Debug)]
pub struct Operation {
    /// What kind of call was made.
    pub op_type: OpType,
    /// Index of the worker that made the call.
    pub thread: usize,
    /// Name of the object the call targeted.
    pub file: String,
    /// Payload size in bytes; zero for calls that do not transfer a payload.
    pub size: u64,
    /// Endpoint of the client that served the call.
    pub endpoint: String,
    /// When the call was issued.
    pub start: Instant,
    /// When the call completed.
    pub end: Instant,
    /// When the first byte of the response body arrived (GET only).
    pub first_byte: Option<Instant>,
    /// Error message if the call failed.
    pub err: Option<String>,
}

impl Operation {
    /// Starts timing a call, returning the in-flight record.
    pub fn start(
        op_type: OpType,
        thread: usize,
        file: impl Into<String>,
        size: u64,
        endpoint: impl Into<String>,
    ) -> PendingOperation {
        PendingOperation {
            op_type,
            thread,
            file: file.into(),
            size,
            endpoint: endpoint.into(),
            start: Instant::now(),
            first_byte: None,
            err: None,
        }
    }

    /// Total time the call took.
    pub fn duration(&self) -> Duration {
        self.end.duration_since(self.start)
    }

    /// Time until the first byte of the response arrived, if recorded.
    pub fn time_to_first_byte(&self) -> Option<Duration> {
        self.first_byte.map(|t| t.duration_since(self.start))
    }

    /// Returns `true` if the call failed.
    pub fn is_err(&self) -> bool {
        self.err.is_some()
    }
}

/// An [`Operation`] whose call is still in flight.
///
/// [`finish`](Self::finish) consumes the record, so an operation is finalized exactly once.
#[derive(Debug)]
pub struct PendingOperation {
    op_type: OpType,
    thread: usize,
    file: String,
    size: u64,
    endpoint: String,
    start: Instant,
    first_byte: Option<Instant>,
    err: Option<String>,
}

impl PendingOperation {
    /// Records the arrival of the first response byte. Later calls are ignored.
    pub fn mark_first_byte(&mut self) {
        self.first_byte.get_or_insert_with(Instant::now);
    }

    /// Records an error. Only the first error is kept.
    pub fn fail(&mut self, err: impl fmt::Display) {
        self.err.get_or_insert_with(|| err.to_string());
    }

    /// Returns `true` if an error has been recorded.
    pub fn failed(&self) -> bool {
        self.err.is_some()
    }

    /// Stops the clock and returns the final record.
    pub fn finish(self) -> Operation {
        Operation {
            op_type: self.op_type,
            thread: self.thread,
            file: self.file,
            size: self.size,
            endpoint: self.endpoint,
            start: self.start,
            end: Instant::now(),
            first_byte: self.first_byte,
            err: self.err,
        }
    }
}

/// The operations recorded during a benchmark run, ordered by start time.
#[derive(Clone, Debug, Default)]
pub struct Operations(Vec<Operation>);

impl Operations {
    /// Creates a collection, sorting the operations by start time.
    pub fn new(mut ops: Vec<Operation>) -> Self {
        ops.sort_by_key(|op| op.start);
        Self(ops)
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the operations in start order.
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    /// Returns only the operations of the given type.
    pub fn filter_type(&self, op_type: OpType) -> Operations {
        Self(
            self.0
                .iter()
                .filter(|op| op.op_type == op_type)
                .cloned()
                .collect(),
        )
    }

    /// Number of operations per type.
    pub fn count_by_type(&self) -> BTreeMap<OpType, usize> {
        let mut counts = BTreeMap::new();
        for op in &self.0 {
            *counts.entry(op.op_type).or_default() += 1;
        }
        counts
    }

    /// Number of failed operations.
    pub fn errors(&self) -> usize {
        self.0.iter().filter(|op| op.is_err()).count()
    }

    /// Payload bytes moved by successful operations.
    pub fn total_bytes(&self) -> u64 {
        self.0
            .iter()
            .filter(|op| !op.is_err())
            .map(|op| op.size)
            .sum()
    }

    /// Wall time from the first start to the last end.
    pub fn span(&self) -> Duration {
        let Some(first) = self.0.iter().map(|op| op.start).min() else {
            return Duration::ZERO;
        };
        let last = self.0.iter().map(|op| op.end).max().unwrap_or(first);
        last.duration_since(first)
    }

    /// Endpoints that served at least one operation.
    pub fn endpoints(&self) -> Vec<&str> {
        let mut endpoints: Vec<_> = self.0.iter().map(|op| op.endpoint.as_str()).collect();
        endpoints.sort_unstable();
        endpoints.dedup();
        endpoints
    }

    /// Consumes the collection, returning the operations.
    pub fn into_inner(self) -> Vec<Operation> {
        self.0
    }
}

impl IntoIterator for Operations {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Operations {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
