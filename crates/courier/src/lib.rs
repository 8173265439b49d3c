//! Courier message-queue broker core.
//!
//! Multi-tenant queues with at-least-once delivery and visibility-timeout
//! semantics: consumers *claim* batches of messages, which hides them from
//! other consumers until the claim expires or is released. The backing
//! store is any key-value backend offering optimistic watch-then-commit
//! concurrency; an in-memory reference backend ships for tests and
//! embedding. The outer transport is not part of this crate.
//!
//! # Example
//!
//! ```no_run
//! use courier::{Broker, ClaimOptions, MemoryStore};
//!
//! let broker = Broker::new(MemoryStore::new());
//! broker.queues().create("orders", "acme").unwrap();
//! broker
//!     .messages()
//!     .post("orders", "acme", vec!["job".into()], 300)
//!     .unwrap();
//!
//! let (claim_id, batch) = broker
//!     .claims()
//!     .create("orders", "acme", ClaimOptions::default(), 10)
//!     .unwrap();
//! assert!(claim_id.is_some());
//! assert_eq!(batch.len(), 1);
//! ```

pub mod broker;
pub mod claims;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod messages;
pub mod queues;
pub mod scope;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use broker::Broker;
pub use claims::{ClaimController, RETRY_CLAIM_TIMEOUT};
pub use config::BrokerConfig;
pub use domain::{ClaimBinding, ClaimMeta, ClaimOptions, Message, MessageDelta, QueueStats};
pub use errors::{CourierError, Result};
pub use messages::MessageController;
pub use queues::QueueController;
pub use store::{Batch, Commit, DataStore, MemoryStore, StoreError};
pub use validation::Validator;
