//! Adapters Layer (Driven Adapters)
//!
//! Implementations of the [`Transport`](crate::transport::Transport) port.
//!
//! ## Adapters
//!
//! - `InMemoryBroker` - Loopback broker for tests and single-process wiring

pub mod in_memory;

pub use in_memory::{InMemoryBroker, PublishedMessage};
