//! # Relay Types Crate
//!
//! Types shared by every layer of the relay: the decoded [`Payload`] handed to
//! subscriber callbacks, the quality-of-service and connection-state enums,
//! and the error taxonomy.
//!
//! ## Design Principles
//!
//! - **Owned payloads**: every callback receives its own `Payload`; nothing in
//!   it is shared with another callback.
//! - **Tagged values**: message fields are [`Value`]s, so application code
//!   pattern-matches instead of casting.
//! - **Typed failures**: transport, configuration, authentication and routing
//!   failures are distinct error types, folded into [`ClientError`] at the API.

pub mod connection;
pub mod errors;
pub mod payload;
pub mod qos;

pub use connection::ConnectionState;
pub use errors::*;
pub use payload::{Fields, Payload, Value};
pub use qos::QoS;
