//! Claim controller: leases over batches of messages.
//!
//! A claim makes its messages invisible to other consumers until it expires
//! or is released. Creation is the contended path: the transaction watches
//! the queue's claimed counter (the single contention witness), selects a
//! batch of active messages, stages every write (message bindings, lifetime
//! extensions, the claim record, the claims-set entry, the counter bump)
//! and commits. A concurrent claimer that committed first moved the witness,
//! aborting this transaction, which then retries against fresh candidates
//! until a wall-clock budget runs out.
//!
//! Expiry is passive. Nothing sweeps dead claims; the existence check
//! filters by expiry time and opportunistically drops stale set entries it
//! happens to observe.

use crate::clock::{self, Deadline};
use crate::domain::{ClaimBinding, ClaimMeta, ClaimOptions, Message, MessageDelta};
use crate::errors::{CourierError, Result};
use crate::messages::MessageController;
use crate::queues::QueueController;
use crate::scope;
use crate::store::{retry, Batch, Commit, DataStore};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Wall-clock budget for the claim-creation contention retry loop.
pub const RETRY_CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

// Claim record wire fields, kept short for backward reading.
const FIELD_ID: &str = "id";
const FIELD_TTL: &str = "t";
const FIELD_EXPIRES: &str = "e";

/// Controller for the claim lifecycle on a queue.
#[derive(Debug, Clone)]
pub struct ClaimController<S> {
    store: S,
    queues: QueueController<S>,
    messages: MessageController<S>,
    retry_budget: Duration,
    connection_attempts: u32,
}

impl<S: DataStore> ClaimController<S> {
    pub fn new(store: S) -> Self {
        let queues = QueueController::new(store.clone());
        let messages = MessageController::new(store.clone());
        Self {
            store,
            queues,
            messages,
            retry_budget: RETRY_CLAIM_TIMEOUT,
            connection_attempts: retry::DEFAULT_CONNECTION_ATTEMPTS,
        }
    }

    /// Override the contention retry budget (tests, configuration).
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    pub(crate) fn with_connection_attempts(mut self, attempts: u32) -> Self {
        self.connection_attempts = attempts;
        self.queues = self.queues.clone().with_connection_attempts(attempts);
        self.messages = self.messages.clone().with_connection_attempts(attempts);
        self
    }

    /// Atomically claim up to `limit` active messages.
    ///
    /// An empty queue is not an error: the result is `(None, [])` and
    /// nothing is written. Otherwise the returned messages carry their
    /// post-claim state, in selection order.
    ///
    /// # Errors
    ///
    /// - `ClaimConflict` once the contention retry budget is exhausted
    /// - `QueueDoesNotExist` propagated from the message view
    pub fn create(
        &self,
        queue: &str,
        project: &str,
        options: ClaimOptions,
        limit: usize,
    ) -> Result<(Option<String>, Vec<Message>)> {
        retry::with_connection_retries(self.connection_attempts, || {
            self.create_once(queue, project, options, limit)
        })
    }

    fn create_once(
        &self,
        queue: &str,
        project: &str,
        options: ClaimOptions,
        limit: usize,
    ) -> Result<(Option<String>, Vec<Message>)> {
        let ClaimOptions { ttl, grace } = options;
        let msg_ttl = ttl + grace;

        let claim_id = Uuid::new_v4().to_string();
        let claim_msgs_key = scope::claim_messages(&claim_id);
        let claims_set_key = scope::claims_set(queue, project);
        let counter_key = self.queues.claim_counter_key(queue, project);

        let deadline = Deadline::new(self.retry_budget);
        while !deadline.expired() {
            // The watch must precede the candidate read: any commit that
            // claims messages also bumps the counter, so candidates observed
            // after this point are either still ours at commit time or the
            // commit aborts.
            let watch = self.store.watch(&[&counter_key])?;

            let candidates = self.messages.active(queue, project, limit)?;
            if candidates.is_empty() {
                return Ok((None, Vec::new()));
            }

            let now = clock::epoch_secs();
            let claim_expires = now + ttl;
            let msg_expires = claim_expires + grace;

            let mut batch = Batch::new();
            let mut deltas = Vec::with_capacity(candidates.len());
            let mut claimed = Vec::with_capacity(candidates.len());

            for mut message in candidates {
                let mut delta = MessageDelta {
                    binding: Some(ClaimBinding::Attach {
                        claim_id: claim_id.clone(),
                        claim_expires,
                    }),
                    ..Default::default()
                };
                message.claim_id = Some(claim_id.clone());
                message.claim_expires = claim_expires;

                if message.would_expire_before(msg_expires) {
                    delta.ttl = Some(msg_ttl);
                    delta.expires = Some(msg_expires);
                    message.ttl = msg_ttl;
                    message.expires = msg_expires;
                }

                batch.list_push(claim_msgs_key.as_str(), message.id.as_str());
                deltas.push((message.id.clone(), delta));
                claimed.push(message);
            }

            self.messages.apply_updates(&mut batch, &deltas);
            batch.hash_set(
                scope::claim(&claim_id),
                vec![
                    (FIELD_ID.to_string(), claim_id.clone()),
                    (FIELD_TTL.to_string(), ttl.to_string()),
                    (FIELD_EXPIRES.to_string(), claim_expires.to_string()),
                ],
            );
            batch.set_add(claims_set_key.as_str(), claim_id.as_str());
            self.queues
                .inc_claimed(queue, project, claimed.len() as i64, &mut batch);

            match self.store.commit(Some(watch), batch)? {
                Commit::Applied => return Ok((Some(claim_id), claimed)),
                Commit::Aborted => {
                    debug!(queue, project, "claim batch aborted by concurrent writer; retrying");
                    continue;
                }
            }
        }

        Err(CourierError::claim_conflict(queue, project))
    }

    /// Inspect a live claim: metadata plus the messages still present.
    ///
    /// The read is a best-effort snapshot; it may race a concurrent
    /// `update`, and that is permitted.
    pub fn get(&self, queue: &str, project: &str, claim_id: &str) -> Result<(ClaimMeta, Vec<Message>)> {
        retry::with_connection_retries(self.connection_attempts, || {
            self.get_once(queue, project, claim_id)
        })
    }

    fn get_once(
        &self,
        queue: &str,
        project: &str,
        claim_id: &str,
    ) -> Result<(ClaimMeta, Vec<Message>)> {
        if !self.exists(queue, project, claim_id)? {
            return Err(CourierError::claim_missing(queue, project, claim_id));
        }

        let ids = self
            .store
            .list_range(&scope::claim_messages(claim_id), 0, usize::MAX)?;
        let messages: Vec<Message> = self
            .messages
            .get_many(&ids)?
            .into_iter()
            .flatten()
            .collect();

        let (expires, ttl) = self.claim_times(claim_id)?;
        let now = clock::epoch_secs();
        let age = now.saturating_sub(expires.saturating_sub(ttl));

        Ok((
            ClaimMeta {
                id: claim_id.to_string(),
                ttl,
                age,
            },
            messages,
        ))
    }

    /// Renew a claim: push its expiry forward and re-extend the lifetimes of
    /// every message still present, with the same extend-if-would-expire
    /// rule used at creation. No contention: renewal does not select new
    /// messages, so the counter watch is not involved.
    pub fn update(
        &self,
        queue: &str,
        project: &str,
        claim_id: &str,
        options: ClaimOptions,
    ) -> Result<()> {
        retry::with_connection_retries(self.connection_attempts, || {
            self.update_once(queue, project, claim_id, options)
        })
    }

    fn update_once(
        &self,
        queue: &str,
        project: &str,
        claim_id: &str,
        options: ClaimOptions,
    ) -> Result<()> {
        if !self.exists(queue, project, claim_id)? {
            return Err(CourierError::claim_missing(queue, project, claim_id));
        }

        let ClaimOptions { ttl, grace } = options;
        let now = clock::epoch_secs();
        let claim_expires = now + ttl;
        let msg_expires = claim_expires + grace;
        let msg_ttl = ttl + grace;

        let ids = self
            .store
            .list_range(&scope::claim_messages(claim_id), 0, usize::MAX)?;
        let present = self.messages.get_many(&ids)?;

        let mut batch = Batch::new();
        let mut deltas = Vec::new();
        for message in present.into_iter().flatten() {
            let mut delta = MessageDelta {
                binding: Some(ClaimBinding::Attach {
                    claim_id: claim_id.to_string(),
                    claim_expires,
                }),
                ..Default::default()
            };
            if message.would_expire_before(msg_expires) {
                delta.ttl = Some(msg_ttl);
                delta.expires = Some(msg_expires);
            }
            deltas.push((message.id, delta));
        }
        self.messages.apply_updates(&mut batch, &deltas);

        batch.hash_set(
            scope::claim(claim_id),
            vec![
                (FIELD_TTL.to_string(), ttl.to_string()),
                (FIELD_EXPIRES.to_string(), claim_expires.to_string()),
            ],
        );

        self.store.commit(None, batch)?;
        Ok(())
    }

    /// Release a claim, making its messages immediately visible.
    ///
    /// Idempotent by contract: releasing a claim that never existed or has
    /// already expired returns silently.
    pub fn delete(&self, queue: &str, project: &str, claim_id: &str) -> Result<()> {
        retry::with_connection_retries(self.connection_attempts, || {
            self.delete_once(queue, project, claim_id)
        })
    }

    fn delete_once(&self, queue: &str, project: &str, claim_id: &str) -> Result<()> {
        if !self.exists(queue, project, claim_id)? {
            return Ok(());
        }

        let now = clock::epoch_secs();
        let claim_msgs_key = scope::claim_messages(claim_id);
        let ids = self.store.list_range(&claim_msgs_key, 0, usize::MAX)?;
        let present: Vec<Message> = self
            .messages
            .get_many(&ids)?
            .into_iter()
            .flatten()
            .collect();

        let mut batch = Batch::new();
        batch.set_rem(scope::claims_set(queue, project), claim_id);
        batch.del(scope::claim(claim_id));
        batch.del(claim_msgs_key);

        let deltas: Vec<(String, MessageDelta)> = present
            .iter()
            .map(|message| {
                (
                    message.id.clone(),
                    MessageDelta {
                        binding: Some(ClaimBinding::Detach { at: now }),
                        ..Default::default()
                    },
                )
            })
            .collect();
        self.messages.apply_updates(&mut batch, &deltas);

        // Decrement by what was actually read back; messages deleted since
        // creation under-count, which the stats figure tolerates.
        self.queues
            .inc_claimed(queue, project, -(present.len() as i64), &mut batch);

        self.store.commit(None, batch)?;
        Ok(())
    }

    /// A claim exists iff its ID is in the queue's claims set and its stored
    /// expiry is still in the future. Set membership alone is not enough:
    /// expiry is passive and the set is never swept, so a stale entry
    /// observed here is dropped on the spot.
    fn exists(&self, queue: &str, project: &str, claim_id: &str) -> Result<bool> {
        let claims_set_key = scope::claims_set(queue, project);
        if !self.store.set_contains(&claims_set_key, claim_id)? {
            return Ok(false);
        }

        let expires = self
            .store
            .hash_get_fields(&scope::claim(claim_id), &[FIELD_EXPIRES])?
            .into_iter()
            .next()
            .flatten()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);

        if clock::epoch_secs() >= expires {
            debug!(queue, project, claim_id, "dropping stale claims-set entry");
            let mut batch = Batch::new();
            batch.set_rem(claims_set_key, claim_id);
            self.store.commit(None, batch)?;
            return Ok(false);
        }

        Ok(true)
    }

    fn claim_times(&self, claim_id: &str) -> Result<(u64, u64)> {
        let values = self
            .store
            .hash_get_fields(&scope::claim(claim_id), &[FIELD_EXPIRES, FIELD_TTL])?;
        let parse = |value: &Option<String>| {
            value
                .as_deref()
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| crate::store::StoreError::Corrupt {
                    key: scope::claim(claim_id),
                    detail: "missing or non-integer claim times".to_string(),
                })
        };
        let expires = parse(&values[0])?;
        let ttl = parse(&values[1])?;
        Ok((expires, ttl))
    }
}


// Property-based invariant tests live alongside.
#[cfg(test)]
#[path = "claims_proptests.rs"]
mod proptests;
