//! Broker configuration loading and parsing.
//!
//! The broker reads an optional TOML file; every section and field falls
//! back to a sensible default, so a missing file configures a working
//! broker. Limits here feed the boundary validator, not the controllers.

use crate::errors::{CourierError, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Claim lease tuning.
    #[serde(default)]
    pub claims: ClaimsConfig,
    /// Message lifetime bounds.
    #[serde(default)]
    pub messages: MessagesConfig,
    /// Batch-size limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Connection-retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Claim lease tuning.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClaimsConfig {
    /// Lease duration applied when the client supplies none.
    pub default_ttl: u64,
    /// Grace period applied when the client supplies none.
    pub default_grace: u64,
    /// Largest lease duration the boundary accepts.
    pub max_ttl: u64,
    /// Largest grace period the boundary accepts.
    pub max_grace: u64,
    /// Wall-clock budget for the claim-creation contention retry loop.
    pub retry_timeout_secs: u64,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            default_ttl: crate::domain::DEFAULT_CLAIM_TTL,
            default_grace: crate::domain::DEFAULT_CLAIM_GRACE,
            max_ttl: 43_200,
            max_grace: 43_200,
            retry_timeout_secs: 10,
        }
    }
}

/// Message lifetime bounds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MessagesConfig {
    /// Smallest TTL accepted when posting.
    pub min_ttl: u64,
    /// Largest TTL accepted when posting (14 days).
    pub max_ttl: u64,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            min_ttl: 1,
            max_ttl: 1_209_600,
        }
    }
}

/// Batch-size limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Batch size applied when the client supplies none.
    pub default_messages_per_claim: usize,
    /// Largest claim batch the boundary accepts.
    pub max_messages_per_claim: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_messages_per_claim: 10,
            max_messages_per_claim: 20,
        }
    }
}

/// Connection-retry policy.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Whole-operation attempts on transient connection errors.
    pub connection_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connection_attempts: crate::store::retry::DEFAULT_CONNECTION_ATTEMPTS,
        }
    }
}

impl BrokerConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| CourierError::Config(err.to_string()))
    }

    /// Load a configuration file, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| CourierError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
