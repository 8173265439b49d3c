//! Boundary validation for client-supplied parameters.
//!
//! Range policing happens here, at the transport edge, and nowhere else:
//! the controllers accept any `ttl >= 0` / `grace >= 0` they are handed.
//! Queue names are restricted so they can never collide with the reserved
//! key separator.

use crate::config::BrokerConfig;
use crate::domain::ClaimOptions;
use crate::errors::{CourierError, Result};

/// Longest accepted queue name.
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Validates client input against the configured limits.
#[derive(Debug, Clone)]
pub struct Validator {
    config: BrokerConfig,
}

impl Validator {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Queue names: 1..=64 chars of `[a-zA-Z0-9_-]`.
    pub fn queue_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN {
            return Err(CourierError::Validation(format!(
                "queue name must be 1-{MAX_QUEUE_NAME_LEN} characters, got {}",
                name.len()
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CourierError::Validation(format!(
                "queue name {name:?} may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(())
    }

    /// Claim lease parameters: `1 <= ttl <= max_ttl`, `grace <= max_grace`.
    pub fn claim_options(&self, options: &ClaimOptions) -> Result<()> {
        let claims = &self.config.claims;
        if options.ttl == 0 || options.ttl > claims.max_ttl {
            return Err(CourierError::Validation(format!(
                "claim ttl must be in 1..={}, got {}",
                claims.max_ttl, options.ttl
            )));
        }
        if options.grace > claims.max_grace {
            return Err(CourierError::Validation(format!(
                "claim grace must be at most {}, got {}",
                claims.max_grace, options.grace
            )));
        }
        Ok(())
    }

    /// Claim batch size: `1 <= limit <= max_messages_per_claim`.
    pub fn claim_limit(&self, limit: usize) -> Result<()> {
        let max = self.config.limits.max_messages_per_claim;
        if limit == 0 || limit > max {
            return Err(CourierError::Validation(format!(
                "claim limit must be in 1..={max}, got {limit}"
            )));
        }
        Ok(())
    }

    /// Message TTL on post.
    pub fn message_ttl(&self, ttl: u64) -> Result<()> {
        let messages = &self.config.messages;
        if ttl < messages.min_ttl || ttl > messages.max_ttl {
            return Err(CourierError::Validation(format!(
                "message ttl must be in {}..={}, got {ttl}",
                messages.min_ttl, messages.max_ttl
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(&BrokerConfig::default())
    }

    #[test]
    fn test_queue_name_accepts_reasonable_names() {
        let v = validator();
        assert!(v.queue_name("fizbit").is_ok());
        assert!(v.queue_name("orders-2024_eu").is_ok());
    }

    #[test]
    fn test_queue_name_rejects_separator_and_empty() {
        let v = validator();
        assert!(v.queue_name("").is_err());
        assert!(v.queue_name("a.b").is_err());
        assert!(v.queue_name("spaced name").is_err());
        assert!(v.queue_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_claim_options_bounds() {
        let v = validator();
        assert!(v.claim_options(&ClaimOptions::new(60, 60)).is_ok());
        assert!(v.claim_options(&ClaimOptions::new(43_200, 0)).is_ok());
        assert!(v.claim_options(&ClaimOptions::new(0, 60)).is_err());
        assert!(v.claim_options(&ClaimOptions::new(43_201, 60)).is_err());
        assert!(v.claim_options(&ClaimOptions::new(60, 43_201)).is_err());
    }

    #[test]
    fn test_claim_limit_bounds() {
        let v = validator();
        assert!(v.claim_limit(1).is_ok());
        assert!(v.claim_limit(20).is_ok());
        assert!(v.claim_limit(0).is_err());
        assert!(v.claim_limit(21).is_err());
    }

    #[test]
    fn test_message_ttl_bounds() {
        let v = validator();
        assert!(v.message_ttl(30).is_ok());
        assert!(v.message_ttl(0).is_err());
        assert!(v.message_ttl(1_209_601).is_err());
    }

    #[test]
    fn test_errors_are_validation_kind() {
        let v = validator();
        assert!(matches!(
            v.claim_limit(0).unwrap_err(),
            CourierError::Validation(_)
        ));
    }
}
