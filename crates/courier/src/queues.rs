//! Queue controller: queue records, stats, and the claimed counter.
//!
//! The claimed counter is the only coupling point the claim subsystem has
//! into queue state: [`QueueController::claim_counter_key`] names the key a
//! claim transaction watches, and [`QueueController::inc_claimed`] stages
//! the adjustment that doubles as stats bookkeeping and contention witness.

use crate::clock;
use crate::domain::QueueStats;
use crate::errors::{CourierError, Result};
use crate::scope;
use crate::store::{retry, Batch, DataStore};
use tracing::{debug, warn};

/// Field of the queue record holding the creation timestamp.
const FIELD_CREATED: &str = "cr";

/// Controller for queue-level state.
#[derive(Debug, Clone)]
pub struct QueueController<S> {
    store: S,
    connection_attempts: u32,
}

impl<S: DataStore> QueueController<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            connection_attempts: retry::DEFAULT_CONNECTION_ATTEMPTS,
        }
    }

    pub(crate) fn with_connection_attempts(mut self, attempts: u32) -> Self {
        self.connection_attempts = attempts;
        self
    }

    /// Create the queue if it does not exist. Returns whether it was created.
    pub fn create(&self, queue: &str, project: &str) -> Result<bool> {
        retry::with_connection_retries(self.connection_attempts, || {
            if self.exists(queue, project)? {
                return Ok(false);
            }
            let mut batch = Batch::new();
            batch.hash_set(
                scope::queue(queue, project),
                vec![(FIELD_CREATED.to_string(), clock::epoch_secs().to_string())],
            );
            self.store.commit(None, batch)?;
            debug!(queue, project, "queue created");
            Ok(true)
        })
    }

    /// Whether the queue record exists.
    pub fn exists(&self, queue: &str, project: &str) -> Result<bool> {
        Ok(self
            .store
            .hash_get_all(&scope::queue(queue, project))?
            .is_some())
    }

    /// Key of the claimed counter: the single contention witness watched by
    /// claim creation.
    pub fn claim_counter_key(&self, queue: &str, project: &str) -> String {
        scope::claimed_counter(queue, project)
    }

    /// Stage a claimed-counter adjustment into the caller's batch.
    pub fn inc_claimed(&self, queue: &str, project: &str, delta: i64, batch: &mut Batch) {
        batch.counter_incr(scope::claimed_counter(queue, project), delta);
    }

    /// Queue statistics, consulting the claimed counter.
    pub fn stats(&self, queue: &str, project: &str) -> Result<QueueStats> {
        retry::with_connection_retries(self.connection_attempts, || {
            if !self.exists(queue, project)? {
                return Err(CourierError::queue_missing(queue, project));
            }

            let raw = self
                .store
                .counter_get(&scope::claimed_counter(queue, project))?;
            if raw < 0 {
                warn!(queue, project, counter = raw, "claimed counter drifted below zero");
            }
            let claimed = raw.max(0) as u64;
            let total = self.store.list_len(&scope::message_list(queue, project))? as u64;

            Ok(QueueStats {
                claimed,
                free: total.saturating_sub(claimed),
                total,
            })
        })
    }

    /// Delete the queue and everything scoped to it: message records, the
    /// message list, claim records of its live claims, the claims set, and
    /// the counter. Idempotent; deleting a missing queue is a no-op.
    ///
    /// The reads feeding the batch are not transactional; records posted
    /// while the delete runs may survive, which callers treat the same as a
    /// post racing a delete.
    pub fn delete(&self, queue: &str, project: &str) -> Result<()> {
        retry::with_connection_retries(self.connection_attempts, || {
            if !self.exists(queue, project)? {
                return Ok(());
            }

            let list_key = scope::message_list(queue, project);
            let claims_key = scope::claims_set(queue, project);

            let message_ids = self.store.list_range(&list_key, 0, usize::MAX)?;
            let claim_ids = self.store.set_members(&claims_key)?;

            let mut batch = Batch::new();
            for id in &message_ids {
                batch.del(scope::message(id));
            }
            for id in &claim_ids {
                batch.del(scope::claim(id));
                batch.del(scope::claim_messages(id));
            }
            batch.del(list_key);
            batch.del(claims_key);
            batch.del(scope::claimed_counter(queue, project));
            batch.del(scope::queue(queue, project));

            self.store.commit(None, batch)?;
            debug!(queue, project, "queue deleted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn controller() -> QueueController<MemoryStore> {
        QueueController::new(MemoryStore::new())
    }

    #[test]
    fn test_create_then_exists() {
        let queues = controller();
        assert!(!queues.exists("q", "p").unwrap());
        assert!(queues.create("q", "p").unwrap());
        assert!(queues.exists("q", "p").unwrap());
    }

    #[test]
    fn test_create_is_idempotent() {
        let queues = controller();
        assert!(queues.create("q", "p").unwrap());
        assert!(!queues.create("q", "p").unwrap());
    }

    #[test]
    fn test_stats_on_missing_queue() {
        let queues = controller();
        assert!(matches!(
            queues.stats("q", "p").unwrap_err(),
            CourierError::QueueDoesNotExist { .. }
        ));
    }

    #[test]
    fn test_stats_on_fresh_queue_are_zero() {
        let queues = controller();
        queues.create("q", "p").unwrap();
        let stats = queues.stats("q", "p").unwrap();
        assert_eq!(stats, QueueStats::default());
    }

    #[test]
    fn test_inc_claimed_feeds_stats() {
        let queues = controller();
        queues.create("q", "p").unwrap();

        let mut batch = Batch::new();
        queues.inc_claimed("q", "p", 4, &mut batch);
        queues.store.commit(None, batch).unwrap();

        let stats = queues.stats("q", "p").unwrap();
        assert_eq!(stats.claimed, 4);
    }

    #[test]
    fn test_negative_counter_clamps_to_zero() {
        let queues = controller();
        queues.create("q", "p").unwrap();

        let mut batch = Batch::new();
        queues.inc_claimed("q", "p", -3, &mut batch);
        queues.store.commit(None, batch).unwrap();

        assert_eq!(queues.stats("q", "p").unwrap().claimed, 0);
    }

    #[test]
    fn test_counter_key_is_scoped() {
        let queues = controller();
        assert_eq!(queues.claim_counter_key("q", "p"), "p.q.claimed");
        assert_ne!(
            queues.claim_counter_key("q", "p1"),
            queues.claim_counter_key("q", "p2")
        );
    }

    #[test]
    fn test_delete_missing_queue_is_noop() {
        let queues = controller();
        queues.delete("q", "p").unwrap();
    }

    #[test]
    fn test_delete_removes_scoped_state() {
        let queues = controller();
        queues.create("q", "p").unwrap();

        let mut batch = Batch::new();
        queues.inc_claimed("q", "p", 2, &mut batch);
        queues.store.commit(None, batch).unwrap();

        queues.delete("q", "p").unwrap();
        assert!(!queues.exists("q", "p").unwrap());

        // Counter is gone as well: recreating starts from zero.
        queues.create("q", "p").unwrap();
        assert_eq!(queues.stats("q", "p").unwrap().claimed, 0);
    }
}
