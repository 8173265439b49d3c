//! Core value types shared by the queue, message, and claim controllers.

use serde::{Deserialize, Serialize};

/// Default claim lease duration in seconds.
pub const DEFAULT_CLAIM_TTL: u64 = 60;

/// Default extra lifetime granted to claimed messages beyond the claim's
/// expiry, so a consumer finishing late does not lose them.
pub const DEFAULT_CLAIM_GRACE: u64 = 60;

/// A queued message, as materialised from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque identifier; insertion order is tracked by the queue's list.
    pub id: String,
    /// Opaque payload.
    pub body: String,
    /// Seconds of life granted after `created`.
    pub ttl: u64,
    /// Absolute epoch-seconds at which the message becomes invisible.
    pub expires: u64,
    /// Epoch-seconds at which the message was posted.
    pub created: u64,
    /// Owning claim, or `None` when unclaimed.
    pub claim_id: Option<String>,
    /// Epoch-seconds at which the current claim's grip ends; 0 when unclaimed.
    pub claim_expires: u64,
}

impl Message {
    /// A message is active iff it has not expired and is not held by a live
    /// claim.
    pub fn is_active(&self, now: u64) -> bool {
        now < self.expires && (self.claim_id.is_none() || now >= self.claim_expires)
    }

    /// Seconds since the message was posted.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created)
    }

    /// True when the message would expire before `horizon`, i.e. its
    /// lifetime must be co-extended to survive the claim that covers it.
    pub(crate) fn would_expire_before(&self, horizon: u64) -> bool {
        self.expires < horizon
    }
}

/// Lease parameters of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOptions {
    /// Requested lease duration in seconds.
    pub ttl: u64,
    /// Additional seconds by which claimed messages outlive the claim.
    pub grace: u64,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CLAIM_TTL,
            grace: DEFAULT_CLAIM_GRACE,
        }
    }
}

impl ClaimOptions {
    pub fn new(ttl: u64, grace: u64) -> Self {
        Self { ttl, grace }
    }
}

/// Metadata returned when inspecting a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMeta {
    pub id: String,
    pub ttl: u64,
    /// Seconds since the claim was created or last renewed.
    pub age: u64,
}

/// Per-queue statistics.
///
/// `claimed` comes from the claimed counter and may run ahead of reality
/// when claims expire passively; it is a stats figure, not an invariant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub claimed: u64,
    pub free: u64,
    pub total: u64,
}

/// How a delta changes a message's claim binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimBinding {
    /// Bind the message to a claim.
    Attach {
        claim_id: String,
        claim_expires: u64,
    },
    /// Release the binding, making the message visible at `at`.
    Detach { at: u64 },
}

/// A partial update to one message record.
///
/// Only the fields present are written; everything else is untouched after
/// commit. This is the single write-back vocabulary shared by claim
/// creation, renewal, and release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDelta {
    pub binding: Option<ClaimBinding>,
    pub ttl: Option<u64>,
    pub expires: Option<u64>,
}

impl MessageDelta {
    pub fn is_empty(&self) -> bool {
        self.binding.is_none() && self.ttl.is_none() && self.expires.is_none()
    }
}
