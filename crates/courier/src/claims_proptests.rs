//! Property-based tests for claim invariants
//!
//! These tests use `proptest` to verify the coupling invariants between
//! claims, messages, and the claimed counter across randomly generated
//! operation sequences. Leases are long-lived here so passive expiry never
//! interferes; expiry behaviour is covered by example-based tests.

use super::*;
use crate::store::MemoryStore;
use proptest::prelude::*;
use std::collections::HashSet;

const QUEUE: &str = "orders";
const PROJECT: &str = "480924";

fn setup() -> (
    ClaimController<MemoryStore>,
    MessageController<MemoryStore>,
    QueueController<MemoryStore>,
) {
    let store = MemoryStore::new();
    let queues = QueueController::new(store.clone());
    queues.create(QUEUE, PROJECT).unwrap();
    (
        ClaimController::new(store.clone()),
        MessageController::new(store),
        queues,
    )
}

fn post(messages: &MessageController<MemoryStore>, count: usize) {
    if count == 0 {
        return;
    }
    let bodies = (0..count).map(|i| format!("m{i}")).collect();
    messages.post(QUEUE, PROJECT, bodies, 3600).unwrap();
}

// Generator for claim TTLs that never expire within a test run.
fn ttl_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![Just(60u64), Just(600), Just(3600), 60u64..7200u64]
}

// Property 1: every message of a freshly created claim is bound to it and
// outlives it by at least the grace period.
proptest! {
    #[test]
    fn prop_created_claim_binds_and_coextends(
        count in 0usize..15,
        limit in 1usize..8,
        ttl in ttl_strategy(),
        grace in 0u64..600,
    ) {
        let (claims, messages, _) = setup();
        post(&messages, count);

        let (claim_id, batch) = claims
            .create(QUEUE, PROJECT, ClaimOptions::new(ttl, grace), limit)
            .unwrap();

        if count == 0 {
            prop_assert!(claim_id.is_none());
            prop_assert!(batch.is_empty());
            return Ok(());
        }

        let claim_id = claim_id.unwrap();
        prop_assert_eq!(batch.len(), count.min(limit));

        let (_, fetched) = claims.get(QUEUE, PROJECT, &claim_id).unwrap();
        prop_assert_eq!(fetched.len(), batch.len());

        for message in &fetched {
            prop_assert_eq!(message.claim_id.as_deref(), Some(claim_id.as_str()));
            prop_assert!(
                message.expires >= message.claim_expires + grace,
                "message {} would evaporate before its claim plus grace",
                message.id
            );
        }
    }
}

// Property 2: messages of concurrently live claims are pairwise disjoint.
proptest! {
    #[test]
    fn prop_live_claims_are_disjoint(
        count in 1usize..20,
        limits in prop::collection::vec(1usize..6, 1..8),
    ) {
        let (claims, messages, _) = setup();
        post(&messages, count);

        let mut seen: HashSet<String> = HashSet::new();
        for limit in limits {
            let (_, batch) = claims
                .create(QUEUE, PROJECT, ClaimOptions::new(600, 60), limit)
                .unwrap();
            for message in batch {
                prop_assert!(
                    seen.insert(message.id.clone()),
                    "message {} claimed twice",
                    message.id
                );
            }
        }

        prop_assert!(seen.len() <= count);
    }
}

// Property 3: the claimed counter equals the summed batch sizes of live
// claims after any create/delete interleaving (no independent message
// deletes, which are the accepted drift case).
proptest! {
    #[test]
    fn prop_counter_tracks_live_claims(
        count in 1usize..20,
        ops in prop::collection::vec((1usize..6, any::<bool>()), 1..10),
    ) {
        let (claims, messages, queues) = setup();
        post(&messages, count);

        let mut live: Vec<(String, u64)> = Vec::new();
        for (limit, delete_oldest) in ops {
            let (claim_id, batch) = claims
                .create(QUEUE, PROJECT, ClaimOptions::new(600, 60), limit)
                .unwrap();
            if let Some(id) = claim_id {
                live.push((id, batch.len() as u64));
            }

            if delete_oldest && !live.is_empty() {
                let (id, _) = live.remove(0);
                claims.delete(QUEUE, PROJECT, &id).unwrap();
            }
        }

        let expected: u64 = live.iter().map(|(_, n)| n).sum();
        prop_assert_eq!(queues.stats(QUEUE, PROJECT).unwrap().claimed, expected);
    }
}

// Property 4: delete is idempotent; a second delete changes nothing.
proptest! {
    #[test]
    fn prop_delete_is_idempotent(
        count in 1usize..10,
        limit in 1usize..6,
    ) {
        let (claims, messages, queues) = setup();
        post(&messages, count);

        let (claim_id, _) = claims
            .create(QUEUE, PROJECT, ClaimOptions::new(600, 60), limit)
            .unwrap();
        let claim_id = claim_id.unwrap();

        claims.delete(QUEUE, PROJECT, &claim_id).unwrap();
        let stats_once = queues.stats(QUEUE, PROJECT).unwrap();
        let active_once = messages.active(QUEUE, PROJECT, count).unwrap().len();

        claims.delete(QUEUE, PROJECT, &claim_id).unwrap();
        let stats_twice = queues.stats(QUEUE, PROJECT).unwrap();
        let active_twice = messages.active(QUEUE, PROJECT, count).unwrap().len();

        prop_assert_eq!(stats_once, stats_twice);
        prop_assert_eq!(active_once, active_twice);
        prop_assert_eq!(active_twice, count);
    }
}

// Property 5: draining a queue through claims never conjures messages and
// a create on the drained queue leaves witness and index untouched.
proptest! {
    #[test]
    fn prop_drained_queue_create_is_readonly(
        count in 0usize..10,
    ) {
        let (claims, messages, queues) = setup();
        post(&messages, count);

        // Drain everything claimable.
        if count > 0 {
            let (_, batch) = claims
                .create(QUEUE, PROJECT, ClaimOptions::new(600, 60), 20)
                .unwrap();
            prop_assert_eq!(batch.len(), count);
        }

        let claimed_before = queues.stats(QUEUE, PROJECT).unwrap().claimed;
        let claims_before = claims
            .store
            .set_members(&scope::claims_set(QUEUE, PROJECT))
            .unwrap()
            .len();

        let (claim_id, batch) = claims
            .create(QUEUE, PROJECT, ClaimOptions::new(600, 60), 5)
            .unwrap();
        prop_assert!(claim_id.is_none());
        prop_assert!(batch.is_empty());

        prop_assert_eq!(queues.stats(QUEUE, PROJECT).unwrap().claimed, claimed_before);
        let claims_after = claims
            .store
            .set_members(&scope::claims_set(QUEUE, PROJECT))
            .unwrap()
            .len();
        prop_assert_eq!(claims_after, claims_before);
    }
}
