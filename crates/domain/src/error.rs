//! Common error types used across the workspace.
//!
//! Each failure class has its own typed error; [`ConnectorError`] is the
//! umbrella that crosses port boundaries and converts via `#[from]`.

use crate::key::{DeviceKey, PropertyKey};
use crate::value::DataType;

/// Top-level error for the connector.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// A command targeted a property that does not exist.
    #[error("unknown property")]
    UnknownProperty(#[from] UnknownPropertyError),

    /// A command tried to write through the wrong writer path.
    #[error("access denied")]
    Access(#[from] AccessError),

    /// A value or definition failed validation.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// An inbound message could not be decoded.
    #[error("protocol error")]
    Protocol(#[from] ProtocolError),

    /// A generation rule could not produce a value.
    #[error("generation error")]
    Generation(#[from] GenerationError),

    /// A device controller found its device misconfigured.
    #[error("invalid state")]
    InvalidState(#[from] InvalidStateError),

    /// The connector lifecycle does not allow the operation.
    #[error("lifecycle error")]
    Lifecycle(#[from] LifecycleError),

    /// The registry collaborator failed.
    #[error("registry error")]
    Registry(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The addressed property is not known to the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("property {key} does not exist")]
pub struct UnknownPropertyError {
    pub key: PropertyKey,
}

/// The write came through a path that is not the property's designated writer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// External commands may not write read-only properties.
    #[error("property {key} is read-only")]
    ReadOnly { key: PropertyKey },

    /// Internal writers may not touch command-driven properties.
    #[error("property {key} is only writable by commands")]
    CommandOnly { key: PropertyKey },
}

/// A value or a definition broke its declared constraints.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A key component was empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// The value kind does not match the declared data type.
    #[error("expected a {expected} value, got {actual}")]
    TypeMismatch {
        expected: DataType,
        actual: &'static str,
    },

    /// A numeric value fell outside the declared range.
    #[error("value {value} is outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// A float was NaN or infinite.
    #[error("value is not a finite number")]
    NotFinite,

    /// An enum value is not a declared member.
    #[error("`{value}` is not an allowed value")]
    NotInEnum { value: String },

    /// A property definition is internally inconsistent.
    #[error("invalid definition for {key}: {reason}")]
    InvalidDefinition { key: String, reason: &'static str },
}

/// A raw inbound message could not be turned into a command.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The payload is not valid JSON for an inbound command.
    #[error("malformed inbound message")]
    Malformed(#[source] serde_json::Error),

    /// A key component in the payload was empty.
    #[error("inbound message has an empty {field}")]
    EmptyField { field: &'static str },
}

/// A generation rule could not produce a value for its property.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The rule does not apply to the property's data type.
    #[error("rule {rule} cannot generate {data_type} values")]
    Unsupported {
        rule: &'static str,
        data_type: DataType,
    },

    /// The rule needs bounds and neither the rule nor the property declares any.
    #[error("rule {rule} needs a numeric range")]
    MissingRange { rule: &'static str },

    /// A pattern value cannot be represented in the property's data type.
    #[error("pattern value does not fit a {data_type} property")]
    PatternValue { data_type: DataType },
}

/// A device controller cannot operate on its device as configured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device {device}: {reason}")]
pub struct InvalidStateError {
    pub device: DeviceKey,
    pub reason: &'static str,
}

/// Start/stop called in the wrong state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("already started")]
    AlreadyStarted,

    #[error("not running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PropertyKey;

    #[test]
    fn should_convert_validation_error_into_connector_error() {
        let err: ConnectorError = ValidationError::NotFinite.into();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }

    #[test]
    fn should_display_unknown_property_with_full_key() {
        let err = UnknownPropertyError {
            key: PropertyKey::new("hall", "sensors", "temperature").unwrap(),
        };
        assert_eq!(err.to_string(), "property hall/sensors/temperature does not exist");
    }

    #[test]
    fn should_display_out_of_range_bounds() {
        let err = ValidationError::OutOfRange {
            value: 150.0,
            min: 10.0,
            max: 30.0,
        };
        assert_eq!(err.to_string(), "value 150 is outside [10, 30]");
    }

    #[test]
    fn should_keep_source_for_malformed_protocol_error() {
        use std::error::Error;

        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err = ProtocolError::Malformed(json_err);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "malformed inbound message");
    }
}
