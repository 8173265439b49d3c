//! Broker facade bundling the controllers over one shared store handle.
//!
//! Controllers are independently usable; the facade exists so embedders
//! wire up configuration exactly once. Clones of the store handle share the
//! same backend, which is the only synchroniser in the system.

use crate::claims::ClaimController;
use crate::config::BrokerConfig;
use crate::messages::MessageController;
use crate::queues::QueueController;
use crate::store::DataStore;
use crate::validation::Validator;
use std::time::Duration;

/// A configured broker core over a backing store.
#[derive(Debug, Clone)]
pub struct Broker<S> {
    queues: QueueController<S>,
    messages: MessageController<S>,
    claims: ClaimController<S>,
    validator: Validator,
    config: BrokerConfig,
}

impl<S: DataStore> Broker<S> {
    /// Broker with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, BrokerConfig::default())
    }

    /// Broker with explicit configuration.
    pub fn with_config(store: S, config: BrokerConfig) -> Self {
        let attempts = config.retry.connection_attempts;
        let budget = Duration::from_secs(config.claims.retry_timeout_secs);

        let queues = QueueController::new(store.clone()).with_connection_attempts(attempts);
        let messages = MessageController::new(store.clone()).with_connection_attempts(attempts);
        let claims = ClaimController::new(store)
            .with_connection_attempts(attempts)
            .with_retry_budget(budget);

        Self {
            queues,
            messages,
            claims,
            validator: Validator::new(&config),
            config,
        }
    }

    pub fn queues(&self) -> &QueueController<S> {
        &self.queues
    }

    pub fn messages(&self) -> &MessageController<S> {
        &self.messages
    }

    pub fn claims(&self) -> &ClaimController<S> {
        &self.claims
    }

    /// Boundary validator for client-supplied parameters.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}
