//! Deterministic key derivation for the backing store.
//!
//! Every logical entity the broker persists lives under a key produced by
//! one of these functions, so the keyspace layout is defined in exactly one
//! place. The separator is reserved: queue names and project IDs are
//! validated at the boundary and never contain it.

/// Reserved separator between key components.
pub const SEPARATOR: char = '.';

/// Suffix for the per-queue message-ID list.
const MESSAGES_SUFFIX: &str = "msgs";

/// Suffix for the per-queue set of live claim IDs.
const CLAIMS_SUFFIX: &str = "claims";

/// Suffix for the per-queue claimed-message counter.
const CLAIMED_SUFFIX: &str = "claimed";

/// Suffix for a message record.
const MESSAGE_SUFFIX: &str = "msg";

/// Suffix for the per-claim message-ID list.
const CLAIM_MESSAGES_SUFFIX: &str = "messages";

/// Key of the queue record for `(queue, project)`.
pub fn queue(queue: &str, project: &str) -> String {
    format!("{project}{SEPARATOR}{queue}")
}

/// Key of the insertion-ordered message-ID list of a queue.
pub fn message_list(queue: &str, project: &str) -> String {
    format!("{project}{SEPARATOR}{queue}{SEPARATOR}{MESSAGES_SUFFIX}")
}

/// Key of a single message record.
pub fn message(message_id: &str) -> String {
    format!("{message_id}{SEPARATOR}{MESSAGE_SUFFIX}")
}

/// Key of the set of live claim IDs of a queue.
pub fn claims_set(queue: &str, project: &str) -> String {
    format!("{project}{SEPARATOR}{queue}{SEPARATOR}{CLAIMS_SUFFIX}")
}

/// Key of the ordered message-ID list of a claim.
pub fn claim_messages(claim_id: &str) -> String {
    format!("{claim_id}{SEPARATOR}{CLAIM_MESSAGES_SUFFIX}")
}

/// Key of a claim record.
///
/// Claim records are stored directly under the claim ID; the function exists
/// so the layout stays centralised with the other derivations.
pub fn claim(claim_id: &str) -> String {
    claim_id.to_string()
}

/// Key of the claimed-message counter of a queue (the watched witness).
pub fn claimed_counter(queue: &str, project: &str) -> String {
    format!("{project}{SEPARATOR}{queue}{SEPARATOR}{CLAIMED_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_scoping_includes_project() {
        assert_eq!(queue("fizbit", "480924"), "480924.fizbit");
        assert_eq!(message_list("fizbit", "480924"), "480924.fizbit.msgs");
        assert_eq!(claims_set("fizbit", "480924"), "480924.fizbit.claims");
        assert_eq!(claimed_counter("fizbit", "480924"), "480924.fizbit.claimed");
    }

    #[test]
    fn test_same_queue_name_different_projects_do_not_collide() {
        assert_ne!(message_list("q", "p1"), message_list("q", "p2"));
        assert_ne!(claims_set("q", "p1"), claims_set("q", "p2"));
    }

    #[test]
    fn test_claim_keys() {
        assert_eq!(claim("abc-123"), "abc-123");
        assert_eq!(claim_messages("abc-123"), "abc-123.messages");
    }

    #[test]
    fn test_message_key() {
        assert_eq!(message("m-1"), "m-1.msg");
    }
}
