//! Bounded re-execution of whole operations on transient store failures.
//!
//! Every public controller operation is wrapped here: a connection error
//! re-runs the operation from the top, a bounded number of times, and any
//! other outcome passes through untouched. Conflicts and non-existence are
//! never retried at this layer; they are answers, not failures.

use crate::errors::Result;
use tracing::debug;

/// Default number of whole-operation attempts on connection errors.
pub const DEFAULT_CONNECTION_ATTEMPTS: u32 = 3;

/// Run `op`, re-executing it on transient errors up to `attempts` times in
/// total. The last transient error surfaces if the budget runs out.
pub fn with_connection_retries<T>(attempts: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_transient() && attempt < attempts => {
                debug!(attempt, error = %err, "transient store failure; re-executing operation");
                attempt += 1;
            }
            other => return other,
        }
    }
}
