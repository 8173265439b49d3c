//! Error taxonomy of the broker core.
//!
//! Semantic kinds, not transport shapes: collaborator errors are propagated
//! unchanged, transient store failures are recovered by the retry layer, and
//! validation never reaches the controllers.

use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the broker controllers.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The queue is not known to the queue controller.
    #[error("queue {queue} does not exist for project {project}")]
    QueueDoesNotExist { queue: String, project: String },

    /// The claim is unknown, expired, or the ID is ill-formed.
    ///
    /// Ill-formed claim IDs are treated as non-existent, never as a
    /// validation failure.
    #[error("claim {claim_id} does not exist for queue {queue} (project {project})")]
    ClaimDoesNotExist {
        queue: String,
        project: String,
        claim_id: String,
    },

    /// `create` exhausted its contention retry budget.
    #[error("could not claim messages on queue {queue} (project {project}): retry budget exhausted")]
    ClaimConflict { queue: String, project: String },

    /// A client-supplied parameter was out of range (boundary check).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backing-store failure that is not one of the kinds above.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CourierError {
    /// True for failures that are safe to retry by re-executing the whole
    /// operation (transient connection trouble).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Connection(_)))
    }

    pub(crate) fn queue_missing(queue: &str, project: &str) -> Self {
        Self::QueueDoesNotExist {
            queue: queue.to_string(),
            project: project.to_string(),
        }
    }

    pub(crate) fn claim_missing(queue: &str, project: &str, claim_id: &str) -> Self {
        Self::ClaimDoesNotExist {
            queue: queue.to_string(),
            project: project.to_string(),
            claim_id: claim_id.to_string(),
        }
    }

    pub(crate) fn claim_conflict(queue: &str, project: &str) -> Self {
        Self::ClaimConflict {
            queue: queue.to_string(),
            project: project.to_string(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_transient() {
        let err = CourierError::Store(StoreError::Connection("reset by peer".into()));
        assert!(err.is_transient());
    }

    #[test]
    fn test_semantic_errors_are_not_transient() {
        assert!(!CourierError::claim_missing("q", "p", "c").is_transient());
        assert!(!CourierError::claim_conflict("q", "p").is_transient());
        assert!(!CourierError::queue_missing("q", "p").is_transient());
        assert!(!CourierError::Validation("ttl out of range".into()).is_transient());
    }

    #[test]
    fn test_display_carries_queue_project_claim() {
        let err = CourierError::claim_missing("fizbit", "480924", "abc");
        let msg = err.to_string();
        assert!(msg.contains("fizbit"));
        assert!(msg.contains("480924"));
        assert!(msg.contains("abc"));
    }
}
