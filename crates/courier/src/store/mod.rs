//! Storage abstraction for the backing key-value store.
//!
//! This module defines the [`DataStore`] trait that decouples the broker
//! controllers from the concrete backend. The model is a remote structured
//! KV store offering only optimistic concurrency: reads are plain
//! round-trips, writes are staged into a [`Batch`] and committed
//! all-or-nothing, and a [`WatchToken`] taken before staging makes the
//! commit abort if any watched key was written in the meantime.
//!
//! # Design
//!
//! - Reads never block writers; there are no server-side locks
//! - A batch commits atomically or not at all, even on abort
//! - Watches snapshot per-key versions; commit compares and aborts on drift
//! - Implementations must be `Clone`: controllers share one handle

use std::collections::HashMap;
use thiserror::Error;

pub mod memory;
pub mod retry;

pub use memory::MemoryStore;

/// Field map of a stored hash record.
pub type Hash = HashMap<String, String>;

/// Failures at the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient transport failure; the whole operation may be re-executed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A key holds a different shape than the operation expects.
    #[error("type mismatch at key {key}: expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// A stored record failed to parse.
    #[error("corrupt record at key {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an optimistic commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Every staged op was applied atomically.
    Applied,
    /// A watched key changed since the watch began; nothing was applied.
    Aborted,
}

/// Snapshot of watched-key versions taken by [`DataStore::watch`].
///
/// Consumed by [`DataStore::commit`]; a token is only meaningful against the
/// store that produced it.
#[derive(Debug, Clone)]
pub struct WatchToken {
    pub(crate) versions: Vec<(String, u64)>,
}

/// A single staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Merge fields into the hash at `key`, creating it if absent.
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Add `member` to the set at `key`.
    SetAdd { key: String, member: String },
    /// Remove `member` from the set at `key`.
    SetRem { key: String, member: String },
    /// Append `value` to the list at `key`.
    ListPush { key: String, value: String },
    /// Remove every occurrence of `value` from the list at `key`.
    ListRem { key: String, value: String },
    /// Adjust the counter at `key` by `delta`, creating it at zero.
    CounterIncr { key: String, delta: i64 },
    /// Delete `key` outright, whatever its shape.
    Del { key: String },
}

/// An atomic batch of staged writes.
///
/// Ops are applied in staging order. The batch is plain data; nothing talks
/// to the store until [`DataStore::commit`].
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn hash_set(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.ops.push(BatchOp::HashSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn set_rem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::SetRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn list_push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::ListPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn list_rem(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::ListRem {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn counter_incr(&mut self, key: impl Into<String>, delta: i64) -> &mut Self {
        self.ops.push(BatchOp::CounterIncr {
            key: key.into(),
            delta,
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Del { key: key.into() });
        self
    }

    pub(crate) fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Trait for backing-store implementations.
///
/// Controllers hold a cloned handle each; clones share the same underlying
/// store. Every method may fail with [`StoreError::Connection`] on real
/// network backends; callers recover through [`retry::with_connection_retries`].
pub trait DataStore: Clone + Send + Sync + 'static {
    /// Read a whole hash record, `None` when the key is absent.
    fn hash_get_all(&self, key: &str) -> StoreResult<Option<Hash>>;

    /// Pipelined bulk read of several hash records.
    fn hash_get_multi(&self, keys: &[String]) -> StoreResult<Vec<Option<Hash>>>;

    /// Read selected fields of a hash; `None` per missing field or record.
    fn hash_get_fields(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>>;

    /// Membership test on a set key; absent set reads as empty.
    fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// All members of a set key, unordered.
    fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Up to `count` list entries starting at `start` (insertion order).
    fn list_range(&self, key: &str, start: usize, count: usize) -> StoreResult<Vec<String>>;

    /// Length of the list at `key`; absent list reads as zero.
    fn list_len(&self, key: &str) -> StoreResult<usize>;

    /// Current counter value; absent counter reads as zero.
    fn counter_get(&self, key: &str) -> StoreResult<i64>;

    /// Snapshot the versions of `keys` for a later optimistic commit.
    fn watch(&self, keys: &[&str]) -> StoreResult<WatchToken>;

    /// Apply `batch` atomically.
    ///
    /// With a watch token, the commit aborts (applying nothing) if any
    /// watched key was written since the token was taken. Without one, the
    /// commit always applies.
    fn commit(&self, watch: Option<WatchToken>, batch: Batch) -> StoreResult<Commit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_builder_stages_in_order() {
        let mut batch = Batch::new();
        batch
            .hash_set("h", vec![("f".into(), "v".into())])
            .set_add("s", "m")
            .counter_incr("c", 3)
            .del("gone");

        assert_eq!(batch.len(), 4);
        assert!(matches!(batch.ops()[0], BatchOp::HashSet { .. }));
        assert!(matches!(batch.ops()[3], BatchOp::Del { .. }));
    }

    #[test]
    fn test_empty_batch() {
        let batch = Batch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
