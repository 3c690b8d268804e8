//! Command — a request to write one property.
//!
//! Commands are transient: they exist only while the command processor
//! handles them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::CorrelationId;
use crate::key::PropertyKey;
use crate::time::{Timestamp, now};
use crate::value::PropertyValue;

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// An external platform command.
    Command,
    /// The engine itself (value generation or a device controller).
    Generated,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("command"),
            Self::Generated => f.write_str("generated"),
        }
    }
}

/// A write request for a single property.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub target: PropertyKey,
    pub value: PropertyValue,
    pub correlation_id: CorrelationId,
    pub timestamp: Timestamp,
    pub origin: Origin,
}

impl Command {
    /// A command received from the platform.
    #[must_use]
    pub fn external(target: PropertyKey, value: PropertyValue, correlation_id: CorrelationId) -> Self {
        Self {
            target,
            value,
            correlation_id,
            timestamp: now(),
            origin: Origin::Command,
        }
    }

    /// A write produced inside the engine.
    #[must_use]
    pub fn generated(target: PropertyKey, value: PropertyValue) -> Self {
        Self {
            target,
            value,
            correlation_id: CorrelationId::new(),
            timestamp: now(),
            origin: Origin::Generated,
        }
    }
}
