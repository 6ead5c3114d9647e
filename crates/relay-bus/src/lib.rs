//! # Relay Bus - Publish/Subscribe Client Core
//!
//! Routes broker messages to in-process subscribers by wildcard topic filter.
//!
//! ## Message Flow
//!
//! ```text
//! ┌─────────────┐  subscribe()   ┌──────────────┐  one network subscribe
//! │ Application │ ─────────────▶ │  RelayClient │ ──────────────────────┐
//! │  callbacks  │                │              │                       ▼
//! └─────────────┘                └──────────────┘                ┌────────────┐
//!        ▲                                                       │ Transport  │
//!        │ own Payload copy  ┌────────────┐   inbound bytes      │  (broker)  │
//!        └────────────────── │ Dispatcher │ ◀─────────────────── └────────────┘
//!                            └────────────┘
//!                     decode / verify ▸ match ▸ spawn
//! ```
//!
//! ## Wire Conventions
//!
//! - **Plain payloads**: a raw scalar (`ok`, `42`) or a JSON document. Bare
//!   scalars are delivered under the configured value key (default `v`).
//! - **Signed payloads**: the token prefix (default `jwt:`) immediately
//!   followed by an HS256 JWT whose `data` claim carries the value.
//! - **Reply metadata**: `$reply` and `$signed` fields are lifted out of the
//!   body before it reaches a callback.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod client;
pub mod codec;
pub mod config;
pub mod registry;
pub mod security;
pub mod topic;
pub mod transport;

// Re-export main types
pub use adapters::{InMemoryBroker, PublishedMessage};
pub use client::{Dispatcher, RelayClient};
pub use codec::{decode, encode, Decoded, DEFAULT_VALUE_KEY};
pub use config::ClientConfig;
pub use registry::{Callback, MatchedRoute, Subscription, SubscriptionRegistry};
pub use security::{SecureEnvelope, DEFAULT_TOKEN_EXPIRY, DEFAULT_TOKEN_PREFIX};
pub use topic::{match_topic, TopicFilter};
pub use transport::{InboundMessage, MessageHandler, Transport};

pub use relay_types::{
    AuthenticationError, ClientError, ConfigurationError, ConnectionError, ConnectionState,
    DecodeError, Fields, Payload, QoS, RoutingError, Value,
};
