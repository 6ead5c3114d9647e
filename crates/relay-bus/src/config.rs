//! Client configuration.
//!
//! # Example
//!
//! ```
//! use relay_bus::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("blower-controller")
//!     .with_secret(b"shared-secret".to_vec())
//!     .with_token_expiry(Duration::from_secs(10))
//!     .with_subscribe_prefix("site-1");
//! assert!(config.validate().is_ok());
//! ```

use crate::codec::DEFAULT_VALUE_KEY;
use crate::security::{DEFAULT_TOKEN_EXPIRY, DEFAULT_TOKEN_PREFIX};
use relay_types::ConfigurationError;
use std::env;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Settings for a relay client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Issuer identity written into signed tokens.
    pub client_id: String,
    /// Key bare scalar payloads are stored under.
    pub value_key: String,
    /// Wire discriminator for signed payloads.
    pub token_prefix: String,
    /// Lifetime of signed tokens.
    pub token_expiry: Duration,
    /// HMAC key for signing and verifying.
    pub secret: Option<Vec<u8>>,
    /// Prepended to every published topic.
    pub publish_prefix: Option<String>,
    /// Prepended to every subscribed filter.
    pub subscribe_prefix: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(format!("relay-{}", Uuid::new_v4()))
    }
}

impl ClientConfig {
    /// Creates a configuration with defaults and the given client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            value_key: DEFAULT_VALUE_KEY.to_string(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            token_expiry: DEFAULT_TOKEN_EXPIRY,
            secret: None,
            publish_prefix: None,
            subscribe_prefix: None,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RELAY_CLIENT_ID`: Issuer identity (default: `relay-<uuid>`)
    /// - `RELAY_VALUE_KEY`: Scalar key (default: `v`)
    /// - `RELAY_TOKEN_PREFIX`: Signed payload prefix (default: `jwt:`)
    /// - `RELAY_TOKEN_EXPIRY_SECS`: Token lifetime (default: 5)
    /// - `RELAY_SECRET`: Signing secret (default: unset)
    /// - `RELAY_PUBLISH_PREFIX`: Publish topic prefix (default: unset)
    /// - `RELAY_SUBSCRIBE_PREFIX`: Subscribe filter prefix (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            client_id: env::var("RELAY_CLIENT_ID").unwrap_or(defaults.client_id),
            value_key: env::var("RELAY_VALUE_KEY").unwrap_or(defaults.value_key),
            token_prefix: env::var("RELAY_TOKEN_PREFIX").unwrap_or(defaults.token_prefix),
            token_expiry: env::var("RELAY_TOKEN_EXPIRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_expiry),
            secret: env::var("RELAY_SECRET").ok().map(String::into_bytes),
            publish_prefix: env::var("RELAY_PUBLISH_PREFIX").ok().filter(|p| !p.is_empty()),
            subscribe_prefix: env::var("RELAY_SUBSCRIBE_PREFIX").ok().filter(|p| !p.is_empty()),
        }
    }

    /// Checks the settings the codec and signer depend on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.value_key.is_empty() {
            return Err(ConfigurationError::InvalidConfig(
                "value_key cannot be empty".to_string(),
            ));
        }

        if self.token_prefix.is_empty() {
            return Err(ConfigurationError::InvalidConfig(
                "token_prefix cannot be empty".to_string(),
            ));
        }

        if self.token_expiry.is_zero() {
            return Err(ConfigurationError::InvalidConfig(
                "token_expiry must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_value_key(mut self, key: impl Into<String>) -> Self {
        self.value_key = key.into();
        self
    }

    pub fn with_token_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.token_prefix = prefix.into();
        self
    }

    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    pub fn with_publish_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.publish_prefix = Some(prefix.into());
        self
    }

    pub fn with_subscribe_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subscribe_prefix = Some(prefix.into());
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("value_key", &self.value_key)
            .field("token_prefix", &self.token_prefix)
            .field("token_expiry", &self.token_expiry)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("publish_prefix", &self.publish_prefix)
            .field("subscribe_prefix", &self.subscribe_prefix)
            .finish()
    }
}
