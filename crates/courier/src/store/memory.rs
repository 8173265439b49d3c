//! In-memory store with real watch-abort semantics.
//!
//! The reference backend: all data lives in RAM behind one mutex, and every
//! key carries a version counter bumped on each write. A watch snapshots the
//! versions of its keys; commit re-checks them under the lock and aborts if
//! any moved, which gives the same abort-on-intervening-write behaviour a
//! remote store provides, observable across threads.
//!
//! Clones share the same underlying store, so a handle can be passed to
//! worker threads the way a connection pool would be.

use super::{Batch, BatchOp, Commit, DataStore, Hash, StoreError, StoreResult, WatchToken};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Entry {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(Vec<String>),
    Counter(i64),
}

impl Entry {
    fn shape(&self) -> &'static str {
        match self {
            Entry::Hash(_) => "hash",
            Entry::Set(_) => "set",
            Entry::List(_) => "list",
            Entry::Counter(_) => "counter",
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    versions: HashMap<String, u64>,
}

impl Inner {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn mismatch(key: &str, expected: &'static str) -> StoreError {
        StoreError::TypeMismatch {
            key: key.to_string(),
            expected,
        }
    }

    /// Reject the batch up front so a failed op cannot leave it half-applied.
    fn check(&self, ops: &[BatchOp]) -> StoreResult<()> {
        for op in ops {
            let (key, expected) = match op {
                BatchOp::HashSet { key, .. } => (key, "hash"),
                BatchOp::SetAdd { key, .. } | BatchOp::SetRem { key, .. } => (key, "set"),
                BatchOp::ListPush { key, .. } | BatchOp::ListRem { key, .. } => (key, "list"),
                BatchOp::CounterIncr { key, .. } => (key, "counter"),
                BatchOp::Del { .. } => continue,
            };
            match self.entries.get(key) {
                None => {}
                Some(entry) if entry.shape() == expected => {}
                Some(_) => return Err(Self::mismatch(key, expected)),
            }
        }
        Ok(())
    }

    fn apply(&mut self, ops: &[BatchOp]) {
        for op in ops {
            match op {
                BatchOp::HashSet { key, fields } => {
                    let entry = self
                        .entries
                        .entry(key.clone())
                        .or_insert_with(|| Entry::Hash(HashMap::new()));
                    if let Entry::Hash(hash) = entry {
                        for (field, value) in fields {
                            hash.insert(field.clone(), value.clone());
                        }
                    }
                    self.bump(key);
                }
                BatchOp::SetAdd { key, member } => {
                    let entry = self
                        .entries
                        .entry(key.clone())
                        .or_insert_with(|| Entry::Set(HashSet::new()));
                    if let Entry::Set(set) = entry {
                        set.insert(member.clone());
                    }
                    self.bump(key);
                }
                BatchOp::SetRem { key, member } => {
                    if let Some(Entry::Set(set)) = self.entries.get_mut(key) {
                        set.remove(member);
                    }
                    self.bump(key);
                }
                BatchOp::ListPush { key, value } => {
                    let entry = self
                        .entries
                        .entry(key.clone())
                        .or_insert_with(|| Entry::List(Vec::new()));
                    if let Entry::List(list) = entry {
                        list.push(value.clone());
                    }
                    self.bump(key);
                }
                BatchOp::ListRem { key, value } => {
                    if let Some(Entry::List(list)) = self.entries.get_mut(key) {
                        list.retain(|v| v != value);
                    }
                    self.bump(key);
                }
                BatchOp::CounterIncr { key, delta } => {
                    let entry = self
                        .entries
                        .entry(key.clone())
                        .or_insert(Entry::Counter(0));
                    if let Entry::Counter(value) = entry {
                        *value += delta;
                    }
                    self.bump(key);
                }
                BatchOp::Del { key } => {
                    self.entries.remove(key);
                    self.bump(key);
                }
            }
        }
    }
}

/// Shared in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl DataStore for MemoryStore {
    fn hash_get_all(&self, key: &str) -> StoreResult<Option<Hash>> {
        let inner = self.lock();
        match inner.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash(hash)) => Ok(Some(hash.clone())),
            Some(_) => Err(Inner::mismatch(key, "hash")),
        }
    }

    fn hash_get_multi(&self, keys: &[String]) -> StoreResult<Vec<Option<Hash>>> {
        let inner = self.lock();
        keys.iter()
            .map(|key| match inner.entries.get(key) {
                None => Ok(None),
                Some(Entry::Hash(hash)) => Ok(Some(hash.clone())),
                Some(_) => Err(Inner::mismatch(key, "hash")),
            })
            .collect()
    }

    fn hash_get_fields(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let inner = self.lock();
        match inner.entries.get(key) {
            None => Ok(vec![None; fields.len()]),
            Some(Entry::Hash(hash)) => Ok(fields
                .iter()
                .map(|field| hash.get(*field).cloned())
                .collect()),
            Some(_) => Err(Inner::mismatch(key, "hash")),
        }
    }

    fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        let inner = self.lock();
        match inner.entries.get(key) {
            None => Ok(false),
            Some(Entry::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(Inner::mismatch(key, "set")),
        }
    }

    fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let inner = self.lock();
        match inner.entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(Inner::mismatch(key, "set")),
        }
    }

    fn list_range(&self, key: &str, start: usize, count: usize) -> StoreResult<Vec<String>> {
        let inner = self.lock();
        match inner.entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => {
                Ok(list.iter().skip(start).take(count).cloned().collect())
            }
            Some(_) => Err(Inner::mismatch(key, "list")),
        }
    }

    fn list_len(&self, key: &str) -> StoreResult<usize> {
        let inner = self.lock();
        match inner.entries.get(key) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(list.len()),
            Some(_) => Err(Inner::mismatch(key, "list")),
        }
    }

    fn counter_get(&self, key: &str) -> StoreResult<i64> {
        let inner = self.lock();
        match inner.entries.get(key) {
            None => Ok(0),
            Some(Entry::Counter(value)) => Ok(*value),
            Some(_) => Err(Inner::mismatch(key, "counter")),
        }
    }

    fn watch(&self, keys: &[&str]) -> StoreResult<WatchToken> {
        let inner = self.lock();
        Ok(WatchToken {
            versions: keys
                .iter()
                .map(|key| (key.to_string(), inner.version(key)))
                .collect(),
        })
    }

    fn commit(&self, watch: Option<WatchToken>, batch: Batch) -> StoreResult<Commit> {
        let mut inner = self.lock();

        if let Some(token) = watch {
            let drifted = token
                .versions
                .iter()
                .any(|(key, version)| inner.version(key) != *version);
            if drifted {
                return Ok(Commit::Aborted);
            }
        }

        inner.check(batch.ops())?;
        inner.apply(batch.ops());
        Ok(Commit::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_hash_merge_keeps_unlisted_fields() {
        let store = MemoryStore::new();

        let mut batch = Batch::new();
        batch.hash_set("h", fields(&[("a", "1"), ("b", "2")]));
        store.commit(None, batch).unwrap();

        let mut batch = Batch::new();
        batch.hash_set("h", fields(&[("b", "9")]));
        store.commit(None, batch).unwrap();

        let hash = store.hash_get_all("h").unwrap().unwrap();
        assert_eq!(hash.get("a").unwrap(), "1");
        assert_eq!(hash.get("b").unwrap(), "9");
    }

    #[test]
    fn test_missing_keys_read_as_empty() {
        let store = MemoryStore::new();
        assert!(store.hash_get_all("nope").unwrap().is_none());
        assert!(!store.set_contains("nope", "m").unwrap());
        assert_eq!(store.list_range("nope", 0, 10).unwrap().len(), 0);
        assert_eq!(store.list_len("nope").unwrap(), 0);
        assert_eq!(store.counter_get("nope").unwrap(), 0);
        assert_eq!(
            store.hash_get_fields("nope", &["a", "b"]).unwrap(),
            vec![None, None]
        );
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        for value in ["a", "b", "c", "d"] {
            batch.list_push("l", value);
        }
        store.commit(None, batch).unwrap();

        assert_eq!(store.list_range("l", 0, 10).unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(store.list_range("l", 1, 2).unwrap(), vec!["b", "c"]);
        assert_eq!(store.list_len("l").unwrap(), 4);
    }

    #[test]
    fn test_list_rem_removes_all_occurrences() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.list_push("l", "x").list_push("l", "y").list_push("l", "x");
        store.commit(None, batch).unwrap();

        let mut batch = Batch::new();
        batch.list_rem("l", "x");
        store.commit(None, batch).unwrap();

        assert_eq!(store.list_range("l", 0, 10).unwrap(), vec!["y"]);
    }

    #[test]
    fn test_counter_incr_and_decrement() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.counter_incr("c", 5);
        store.commit(None, batch).unwrap();

        let mut batch = Batch::new();
        batch.counter_incr("c", -2);
        store.commit(None, batch).unwrap();

        assert_eq!(store.counter_get("c").unwrap(), 3);
    }

    #[test]
    fn test_watch_commit_aborts_on_intervening_write() {
        let store = MemoryStore::new();

        let watch = store.watch(&["c"]).unwrap();

        // Intervening writer bumps the watched key.
        let mut sneak = Batch::new();
        sneak.counter_incr("c", 1);
        assert_eq!(store.commit(None, sneak).unwrap(), Commit::Applied);

        let mut batch = Batch::new();
        batch.counter_incr("c", 10).set_add("s", "m");
        assert_eq!(store.commit(Some(watch), batch).unwrap(), Commit::Aborted);

        // Nothing from the aborted batch applied.
        assert_eq!(store.counter_get("c").unwrap(), 1);
        assert!(!store.set_contains("s", "m").unwrap());
    }

    #[test]
    fn test_watch_commit_applies_when_undisturbed() {
        let store = MemoryStore::new();
        let watch = store.watch(&["c"]).unwrap();

        let mut batch = Batch::new();
        batch.counter_incr("c", 2);
        assert_eq!(store.commit(Some(watch), batch).unwrap(), Commit::Applied);
        assert_eq!(store.counter_get("c").unwrap(), 2);
    }

    #[test]
    fn test_watch_on_absent_key_sees_creation() {
        let store = MemoryStore::new();
        let watch = store.watch(&["fresh"]).unwrap();

        let mut sneak = Batch::new();
        sneak.counter_incr("fresh", 1);
        store.commit(None, sneak).unwrap();

        let mut batch = Batch::new();
        batch.counter_incr("fresh", 1);
        assert_eq!(store.commit(Some(watch), batch).unwrap(), Commit::Aborted);
    }

    #[test]
    fn test_type_mismatch_rejects_whole_batch() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.counter_incr("c", 1);
        store.commit(None, batch).unwrap();

        let mut batch = Batch::new();
        batch.set_add("ok", "m").list_push("c", "not-a-list");
        assert!(store.commit(None, batch).is_err());

        // The valid op in the rejected batch must not have applied.
        assert!(!store.set_contains("ok", "m").unwrap());
    }

    #[test]
    fn test_del_then_recreate_with_other_shape() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.counter_incr("k", 7);
        store.commit(None, batch).unwrap();

        let mut batch = Batch::new();
        batch.del("k").list_push("k", "v");
        store.commit(None, batch).unwrap();

        assert_eq!(store.list_range("k", 0, 10).unwrap(), vec!["v"]);
    }

    #[test]
    fn test_clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();

        let mut batch = Batch::new();
        batch.counter_incr("c", 4);
        store.commit(None, batch).unwrap();

        assert_eq!(other.counter_get("c").unwrap(), 4);
    }

    #[test]
    fn test_concurrent_watched_commits_one_wins() {
        use std::sync::Barrier;
        use std::thread;

        let store = MemoryStore::new();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let watch = store.watch(&["witness"]).unwrap();
                    barrier.wait();
                    let mut batch = Batch::new();
                    batch.counter_incr("witness", 1);
                    store.commit(Some(watch), batch).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<Commit> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let applied = outcomes.iter().filter(|c| **c == Commit::Applied).count();

        // Both watched before either committed, so at most one can win; at
        // least one must win because the loser's abort applies nothing.
        assert_eq!(applied, 1);
        assert_eq!(store.counter_get("witness").unwrap(), 1);
    }
}
