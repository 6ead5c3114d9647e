//! # Error Types
//!
//! Failure kinds of the relay client.
//!
//! Connection, configuration and routing errors are returned to the caller of
//! the operation that hit them. Authentication errors stay inside the dispatch
//! pipeline (the message is dropped) and are only returned by the direct
//! token API. Decode errors are never returned; they are recorded on the
//! [`Payload`](crate::Payload) and delivery continues.

use crate::connection::ConnectionState;
use thiserror::Error;

/// Transport-level failures and calls made in the wrong connection state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The transport rejected connect, publish, subscribe or unsubscribe.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation requires a connected client.
    #[error("Not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    /// Lifecycle transition not allowed from the current state.
    #[error("Invalid connection transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Missing or invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Signing was requested but no secret is set.
    #[error("No signing secret configured")]
    NoSecret,

    /// Topic filter pattern is not well formed.
    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// Any other invalid setting.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Signed-token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    /// Structure, algorithm, signature or validity window check failed.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token verified but carries no `data` claim.
    #[error("Malformed token: no data claim")]
    MalformedToken,
}

/// Reply routing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The originating payload carried no reply topic.
    #[error("No reply topic set on payload")]
    NoReplyTopic,
}

/// Structural decode failure recorded on a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Payload decode error: {message}")]
pub struct DecodeError {
    pub message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors returned by client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Outbound value could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Returns true for transport and connection-state failures.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
