//! Quality-of-service levels passed through to the broker transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery guarantee requested from the transport.
///
/// The core never upgrades or downgrades the level; it is forwarded as given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget (wire value 0).
    #[default]
    AtMostOnce,
    /// Acknowledged delivery (wire value 1).
    AtLeastOnce,
    /// Assured single delivery (wire value 2).
    ExactlyOnce,
}

impl QoS {
    /// Wire byte for this level.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(other),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}
