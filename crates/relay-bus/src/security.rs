//! # Secure Envelope
//!
//! Signs outbound values into expiring HS256 tokens and verifies inbound ones.
//!
//! ## Wire Format
//!
//! ```text
//! <prefix><base64url(header)>.<base64url(claims)>.<base64url(hmac)>
//! ```
//!
//! The prefix (default `jwt:`) is followed directly by the token with no
//! separator, so a receiver can tell signed from plain payloads by looking at
//! the first bytes. Claims are `{iss, iat, exp, data}`.
//!
//! ## Security Properties
//!
//! - **HMAC-SHA256**: tokens are keyed with a shared secret; the signature is
//!   checked in constant time.
//! - **Algorithm pinning**: only `HS256` headers are accepted.
//! - **Time-Bounded Validity**: a token is rejected once `now > exp`, and if
//!   `iat` lies in the future. No grace period.

use crate::config::ClientConfig;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use relay_types::{AuthenticationError, ClientError, ConfigurationError, Fields, Value};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Default wire discriminator for signed payloads.
pub const DEFAULT_TOKEN_PREFIX: &str = "jwt:";

/// Default token lifetime.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(5);

/// The only accepted signing algorithm.
pub const TOKEN_ALGORITHM: &str = "HS256";

/// Claim holding the signed value.
pub const DATA_CLAIM: &str = "data";

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenClaims<'a> {
    iss: &'a str,
    iat: u64,
    exp: u64,
    data: &'a Value,
}

/// Signs and verifies prefixed tokens with one shared secret.
#[derive(Clone)]
pub struct SecureEnvelope {
    secret: Option<Vec<u8>>,
    issuer: String,
    expiry: Duration,
    prefix: String,
}

impl SecureEnvelope {
    pub fn new(
        secret: Option<Vec<u8>>,
        issuer: impl Into<String>,
        expiry: Duration,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            secret,
            issuer: issuer.into(),
            expiry,
            prefix: prefix.into(),
        }
    }

    /// Builds an envelope from the client's signing settings.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.secret.clone(),
            config.client_id.clone(),
            config.token_expiry,
            config.token_prefix.clone(),
        )
    }

    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns true if `raw` carries the signed-payload discriminator followed
    /// by at least one byte.
    #[must_use]
    pub fn is_signed(&self, raw: &[u8]) -> bool {
        raw.len() > self.prefix.len() && raw.starts_with(self.prefix.as_bytes())
    }

    /// Signs `value` with the current time as `iat`.
    ///
    /// # Errors
    ///
    /// `ConfigurationError::NoSecret` when no secret is configured.
    pub fn sign(&self, value: &Value) -> Result<String, ClientError> {
        self.sign_at(value, current_timestamp())
    }

    /// Signs `value` as if the current Unix time were `now`.
    pub fn sign_at(&self, value: &Value, now: u64) -> Result<String, ClientError> {
        let secret = self.secret.as_deref().ok_or(ConfigurationError::NoSecret)?;

        let header = TokenHeader {
            alg: TOKEN_ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let claims = TokenClaims {
            iss: &self.issuer,
            iat: now,
            exp: now.saturating_add(self.expiry.as_secs()),
            data: value,
        };

        let header = serde_json::to_vec(&header).map_err(|e| ClientError::Serialization(e.to_string()))?;
        let claims = serde_json::to_vec(&claims).map_err(|e| ClientError::Serialization(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature = URL_SAFE_NO_PAD.encode(hmac_sha256(secret, signing_input.as_bytes())?);

        Ok(format!("{}{}.{}", self.prefix, signing_input, signature))
    }

    /// Verifies a prefixed token and returns `{value_key: data}`.
    ///
    /// # Errors
    ///
    /// - `AuthenticationError::InvalidToken` for a missing prefix, bad
    ///   structure, wrong algorithm, bad signature, expiry, or a token issued
    ///   in the future.
    /// - `AuthenticationError::MalformedToken` if there is no `data` claim.
    pub fn verify(&self, text: &str, value_key: &str) -> Result<Fields, AuthenticationError> {
        self.verify_at(text, value_key, current_timestamp())
    }

    /// Verifies as if the current Unix time were `now`.
    pub fn verify_at(
        &self,
        text: &str,
        value_key: &str,
        now: u64,
    ) -> Result<Fields, AuthenticationError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| invalid("no secret configured to verify token"))?;

        let token = text
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| invalid("missing token prefix"))?;

        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("token must have three segments"));
        };

        let header: TokenHeader = decode_segment(header_b64)?;
        if header.alg != TOKEN_ALGORITHM {
            return Err(invalid(&format!("unsupported algorithm {}", header.alg)));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| invalid("signature is not base64url"))?;
        let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| invalid("unusable secret"))?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let mut claims: Fields = decode_segment(claims_b64)?;

        let expires_at = numeric_claim(&claims, "exp").ok_or_else(|| invalid("missing exp claim"))?;
        if now > expires_at {
            return Err(invalid("token expired"));
        }
        if numeric_claim(&claims, "iat").is_some_and(|issued_at| issued_at > now) {
            return Err(invalid("token used before issued"));
        }

        let data = claims
            .remove(DATA_CLAIM)
            .ok_or(AuthenticationError::MalformedToken)?;

        let mut fields = Fields::new();
        fields.insert(value_key.to_string(), data);
        Ok(fields)
    }
}

impl std::fmt::Debug for SecureEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureEnvelope")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("issuer", &self.issuer)
            .field("expiry", &self.expiry)
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn invalid(reason: &str) -> AuthenticationError {
    AuthenticationError::InvalidToken(reason.to_string())
}

fn hmac_sha256(secret: &[u8], input: &[u8]) -> Result<Vec<u8>, ClientError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ConfigurationError::InvalidConfig(format!("unusable secret: {e}")))?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthenticationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| invalid("segment is not base64url"))?;
    serde_json::from_slice(&bytes).map_err(|_| invalid("segment is not valid JSON"))
}

/// Reads a NumericDate claim, accepting integer or float encodings.
fn numeric_claim(claims: &Fields, name: &str) -> Option<u64> {
    let value = claims.get(name)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Returns the current Unix timestamp, or 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
