//! Message controller: posting, the active view, and the delta applicator.
//!
//! The active view scans the queue's insertion-order ID list in fixed-size
//! pages, materialising and filtering as it goes, and stops as soon as the
//! requested batch is full. Every call starts from the head of the list, so
//! a claim transaction that lost a race sees fresh candidates on retry.
//!
//! Writes to message records go through [`MessageController::apply_updates`],
//! which stages partial field updates into a caller-supplied batch; the
//! claim controller never touches message encodings directly.

use crate::clock;
use crate::domain::{ClaimBinding, Message, MessageDelta};
use crate::errors::{CourierError, Result};
use crate::queues::QueueController;
use crate::scope;
use crate::store::{retry, Batch, DataStore, Hash, StoreError};
use tracing::trace;
use uuid::Uuid;

/// Page size of the active-view list scan.
const ACTIVE_SCAN_PAGE: usize = 32;

// Wire field names, kept short for backward reading of existing records.
const FIELD_ID: &str = "id";
const FIELD_BODY: &str = "b";
const FIELD_TTL: &str = "t";
const FIELD_EXPIRES: &str = "e";
const FIELD_CLAIM: &str = "c";
const FIELD_CLAIM_EXPIRES: &str = "c.e";
const FIELD_CREATED: &str = "cr";

/// Controller for message records on a queue.
#[derive(Debug, Clone)]
pub struct MessageController<S> {
    store: S,
    queues: QueueController<S>,
    connection_attempts: u32,
}

impl<S: DataStore> MessageController<S> {
    pub fn new(store: S) -> Self {
        let queues = QueueController::new(store.clone());
        Self {
            store,
            queues,
            connection_attempts: retry::DEFAULT_CONNECTION_ATTEMPTS,
        }
    }

    pub(crate) fn with_connection_attempts(mut self, attempts: u32) -> Self {
        self.connection_attempts = attempts;
        self.queues = self.queues.clone().with_connection_attempts(attempts);
        self
    }

    fn queue_guard(&self, queue: &str, project: &str) -> Result<()> {
        if !self.queues.exists(queue, project)? {
            return Err(CourierError::queue_missing(queue, project));
        }
        Ok(())
    }

    /// Post messages in order, all with the same TTL. Returns the fresh IDs.
    pub fn post(
        &self,
        queue: &str,
        project: &str,
        bodies: Vec<String>,
        ttl: u64,
    ) -> Result<Vec<String>> {
        retry::with_connection_retries(self.connection_attempts, || {
            self.queue_guard(queue, project)?;

            let now = clock::epoch_secs();
            let list_key = scope::message_list(queue, project);
            let mut batch = Batch::new();
            let mut ids = Vec::with_capacity(bodies.len());

            for body in &bodies {
                let id = Uuid::new_v4().to_string();
                let message = Message {
                    id: id.clone(),
                    body: body.clone(),
                    ttl,
                    expires: now + ttl,
                    created: now,
                    claim_id: None,
                    claim_expires: 0,
                };
                batch.hash_set(scope::message(&id), encode(&message));
                batch.list_push(list_key.as_str(), id.as_str());
                ids.push(id);
            }

            self.store.commit(None, batch)?;
            trace!(queue, project, count = ids.len(), "messages posted");
            Ok(ids)
        })
    }

    /// Up to `limit` active messages in insertion order.
    ///
    /// Restartable by construction: the scan begins at the head of the
    /// queue's list on every call. Message IDs whose records have vanished
    /// (independently deleted) are skipped.
    pub fn active(&self, queue: &str, project: &str, limit: usize) -> Result<Vec<Message>> {
        self.queue_guard(queue, project)?;

        let list_key = scope::message_list(queue, project);
        let now = clock::epoch_secs();
        let mut found = Vec::with_capacity(limit.min(ACTIVE_SCAN_PAGE));
        let mut offset = 0;

        if limit == 0 {
            return Ok(found);
        }

        loop {
            let page = self.store.list_range(&list_key, offset, ACTIVE_SCAN_PAGE)?;
            if page.is_empty() {
                return Ok(found);
            }
            offset += page.len();

            let keys: Vec<String> = page.iter().map(|id| scope::message(id)).collect();
            for hash in self.store.hash_get_multi(&keys)? {
                let Some(hash) = hash else { continue };
                let message = decode(hash)?;
                if message.is_active(now) {
                    found.push(message);
                    if found.len() == limit {
                        return Ok(found);
                    }
                }
            }

            if page.len() < ACTIVE_SCAN_PAGE {
                return Ok(found);
            }
        }
    }

    /// Bulk materialisation; `None` per vanished record.
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<Option<Message>>> {
        let keys: Vec<String> = ids.iter().map(|id| scope::message(id)).collect();
        self.store
            .hash_get_multi(&keys)?
            .into_iter()
            .map(|hash| hash.map(decode).transpose().map_err(CourierError::from))
            .collect()
    }

    /// Delete one message: record and list entry. Idempotent.
    pub fn delete(&self, queue: &str, project: &str, message_id: &str) -> Result<()> {
        retry::with_connection_retries(self.connection_attempts, || {
            self.queue_guard(queue, project)?;

            let mut batch = Batch::new();
            batch.del(scope::message(message_id));
            batch.list_rem(scope::message_list(queue, project), message_id);
            self.store.commit(None, batch)?;
            Ok(())
        })
    }

    /// Number of message IDs tracked on the queue, expired ones included.
    pub fn count(&self, queue: &str, project: &str) -> Result<usize> {
        self.queue_guard(queue, project)?;
        Ok(self
            .store
            .list_len(&scope::message_list(queue, project))?)
    }

    /// Stage partial message updates into the caller's atomic batch.
    ///
    /// Fields absent from a delta stay untouched after commit; an entirely
    /// empty delta stages nothing.
    pub fn apply_updates(&self, batch: &mut Batch, deltas: &[(String, MessageDelta)]) {
        for (id, delta) in deltas {
            let mut fields = Vec::new();
            match &delta.binding {
                Some(ClaimBinding::Attach {
                    claim_id,
                    claim_expires,
                }) => {
                    fields.push((FIELD_CLAIM.to_string(), claim_id.clone()));
                    fields.push((FIELD_CLAIM_EXPIRES.to_string(), claim_expires.to_string()));
                }
                Some(ClaimBinding::Detach { at }) => {
                    fields.push((FIELD_CLAIM.to_string(), String::new()));
                    fields.push((FIELD_CLAIM_EXPIRES.to_string(), at.to_string()));
                }
                None => {}
            }
            if let Some(ttl) = delta.ttl {
                fields.push((FIELD_TTL.to_string(), ttl.to_string()));
            }
            if let Some(expires) = delta.expires {
                fields.push((FIELD_EXPIRES.to_string(), expires.to_string()));
            }
            if !fields.is_empty() {
                batch.hash_set(scope::message(id), fields);
            }
        }
    }
}

fn encode(message: &Message) -> Vec<(String, String)> {
    vec![
        (FIELD_ID.to_string(), message.id.clone()),
        (FIELD_BODY.to_string(), message.body.clone()),
        (FIELD_TTL.to_string(), message.ttl.to_string()),
        (FIELD_EXPIRES.to_string(), message.expires.to_string()),
        (FIELD_CREATED.to_string(), message.created.to_string()),
        (
            FIELD_CLAIM.to_string(),
            message.claim_id.clone().unwrap_or_default(),
        ),
        (
            FIELD_CLAIM_EXPIRES.to_string(),
            message.claim_expires.to_string(),
        ),
    ]
}

fn decode(hash: Hash) -> std::result::Result<Message, StoreError> {
    let id = require(&hash, FIELD_ID)?;
    let corrupt = |detail: String| StoreError::Corrupt {
        key: scope::message(&id),
        detail,
    };

    let claim_id = match hash.get(FIELD_CLAIM).map(String::as_str) {
        None | Some("") => None,
        Some(value) => Some(value.to_string()),
    };

    Ok(Message {
        body: hash.get(FIELD_BODY).cloned().unwrap_or_default(),
        ttl: parse_u64(&hash, FIELD_TTL).map_err(&corrupt)?,
        expires: parse_u64(&hash, FIELD_EXPIRES).map_err(&corrupt)?,
        created: parse_u64(&hash, FIELD_CREATED).map_err(&corrupt)?,
        claim_expires: parse_u64(&hash, FIELD_CLAIM_EXPIRES).map_err(&corrupt)?,
        claim_id,
        id,
    })
}

fn require(hash: &Hash, field: &str) -> std::result::Result<String, StoreError> {
    hash.get(field).cloned().ok_or_else(|| StoreError::Corrupt {
        key: "<unknown message>".to_string(),
        detail: format!("missing field {field}"),
    })
}

fn parse_u64(hash: &Hash, field: &str) -> std::result::Result<u64, String> {
    let value = hash
        .get(field)
        .ok_or_else(|| format!("missing field {field}"))?;
    value
        .parse::<u64>()
        .map_err(|_| format!("field {field} is not an integer: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::thread;
    use std::time::Duration;

    fn setup() -> (MessageController<MemoryStore>, QueueController<MemoryStore>) {
        let store = MemoryStore::new();
        let queues = QueueController::new(store.clone());
        queues.create("q", "p").unwrap();
        (MessageController::new(store), queues)
    }

    #[test]
    fn test_post_requires_queue() {
        let messages = MessageController::new(MemoryStore::new());
        let result = messages.post("q", "p", vec!["x".into()], 60);
        assert!(matches!(
            result.unwrap_err(),
            CourierError::QueueDoesNotExist { .. }
        ));
    }

    #[test]
    fn test_post_then_active_in_insertion_order() {
        let (messages, _) = setup();
        let ids = messages
            .post("q", "p", vec!["a".into(), "b".into(), "c".into()], 60)
            .unwrap();

        let active = messages.active("q", "p", 10).unwrap();
        assert_eq!(active.len(), 3);
        let got: Vec<_> = active.iter().map(|m| m.id.as_str()).collect();
        let want: Vec<_> = ids.iter().map(String::as_str).collect();
        assert_eq!(got, want);
        assert_eq!(active[0].body, "a");
        assert!(active[0].claim_id.is_none());
        assert_eq!(active[0].claim_expires, 0);
    }

    #[test]
    fn test_active_respects_limit() {
        let (messages, _) = setup();
        let bodies: Vec<String> = (0..8).map(|i| format!("m{i}")).collect();
        messages.post("q", "p", bodies, 60).unwrap();

        assert_eq!(messages.active("q", "p", 5).unwrap().len(), 5);
        assert_eq!(messages.active("q", "p", 0).unwrap().len(), 0);
    }

    #[test]
    fn test_active_scans_past_a_full_page() {
        let (messages, _) = setup();
        let bodies: Vec<String> = (0..40).map(|i| format!("m{i}")).collect();
        let ids = messages.post("q", "p", bodies, 60).unwrap();

        let active = messages.active("q", "p", 40).unwrap();
        assert_eq!(active.len(), 40);
        assert_eq!(active[39].id, ids[39]);
    }

    #[test]
    fn test_expired_messages_are_not_active() {
        let (messages, _) = setup();
        messages.post("q", "p", vec!["short".into()], 1).unwrap();
        messages.post("q", "p", vec!["long".into()], 60).unwrap();

        thread::sleep(Duration::from_millis(1200));

        let active = messages.active("q", "p", 10).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].body, "long");
    }

    #[test]
    fn test_restartable_scan_sees_same_head() {
        let (messages, _) = setup();
        let ids = messages
            .post("q", "p", vec!["a".into(), "b".into()], 60)
            .unwrap();

        let first = messages.active("q", "p", 1).unwrap();
        let second = messages.active("q", "p", 1).unwrap();
        assert_eq!(first[0].id, ids[0]);
        assert_eq!(second[0].id, ids[0]);
    }

    #[test]
    fn test_get_many_reports_vanished_records() {
        let (messages, _) = setup();
        let ids = messages
            .post("q", "p", vec!["a".into(), "b".into()], 60)
            .unwrap();

        messages.delete("q", "p", &ids[0]).unwrap();

        let got = messages.get_many(&ids).unwrap();
        assert!(got[0].is_none());
        assert_eq!(got[1].as_ref().unwrap().body, "b");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (messages, _) = setup();
        let ids = messages.post("q", "p", vec!["a".into()], 60).unwrap();
        messages.delete("q", "p", &ids[0]).unwrap();
        messages.delete("q", "p", &ids[0]).unwrap();
        assert_eq!(messages.count("q", "p").unwrap(), 0);
    }

    #[test]
    fn test_apply_updates_touches_only_named_fields() {
        let (messages, _) = setup();
        let ids = messages.post("q", "p", vec!["a".into()], 60).unwrap();
        let before = messages.get_many(&ids).unwrap()[0].clone().unwrap();

        let delta = MessageDelta {
            binding: Some(ClaimBinding::Attach {
                claim_id: "claim-1".to_string(),
                claim_expires: before.expires + 100,
            }),
            ttl: None,
            expires: None,
        };
        let mut batch = Batch::new();
        messages.apply_updates(&mut batch, &[(ids[0].clone(), delta)]);
        messages.store.commit(None, batch).unwrap();

        let after = messages.get_many(&ids).unwrap()[0].clone().unwrap();
        assert_eq!(after.claim_id.as_deref(), Some("claim-1"));
        assert_eq!(after.claim_expires, before.expires + 100);
        assert_eq!(after.ttl, before.ttl);
        assert_eq!(after.expires, before.expires);
        assert_eq!(after.body, before.body);
    }

    #[test]
    fn test_detach_clears_binding() {
        let (messages, _) = setup();
        let ids = messages.post("q", "p", vec!["a".into()], 60).unwrap();

        let mut batch = Batch::new();
        messages.apply_updates(
            &mut batch,
            &[(
                ids[0].clone(),
                MessageDelta {
                    binding: Some(ClaimBinding::Attach {
                        claim_id: "claim-1".to_string(),
                        claim_expires: 999_999_999_999,
                    }),
                    ..Default::default()
                },
            )],
        );
        messages.store.commit(None, batch).unwrap();
        assert!(messages.active("q", "p", 10).unwrap().is_empty());

        let now = clock::epoch_secs();
        let mut batch = Batch::new();
        messages.apply_updates(
            &mut batch,
            &[(
                ids[0].clone(),
                MessageDelta {
                    binding: Some(ClaimBinding::Detach { at: now }),
                    ..Default::default()
                },
            )],
        );
        messages.store.commit(None, batch).unwrap();

        let active = messages.active("q", "p", 10).unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].claim_id.is_none());
    }

    #[test]
    fn test_codec_roundtrip() {
        let message = Message {
            id: "m-1".to_string(),
            body: "payload".to_string(),
            ttl: 30,
            expires: 1_000,
            created: 970,
            claim_id: Some("c-1".to_string()),
            claim_expires: 995,
        };
        let hash: Hash = encode(&message).into_iter().collect();
        assert_eq!(decode(hash).unwrap(), message);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut hash = Hash::new();
        hash.insert(FIELD_ID.to_string(), "m-1".to_string());
        hash.insert(FIELD_TTL.to_string(), "not-a-number".to_string());
        assert!(decode(hash).is_err());
    }
}
