//! Wire messages exchanged with the platform message bus (JSON).
//!
//! Inbound: one [`InboundCommand`] per message.
//! Outbound: [`OutboundMessage`], tagged by `"type"`.

use serde::{Deserialize, Serialize};

use vconnector_domain::command::{Command, Origin};
use vconnector_domain::device::{ConnectionChange, ConnectionState};
use vconnector_domain::error::{ConnectorError, ProtocolError};
use vconnector_domain::id::CorrelationId;
use vconnector_domain::key::{ChannelKey, DeviceKey, PropertyKey, PropertyName};
use vconnector_domain::state_change::StateChange;
use vconnector_domain::time::Timestamp;
use vconnector_domain::value::PropertyValue;

/// A raw write request as received from the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundCommand {
    pub device: String,
    pub channel: String,
    pub property: String,
    pub value: PropertyValue,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

impl InboundCommand {
    /// Parse a raw message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if `raw` is not a valid command.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }

    /// Convert into an external [`Command`], generating a correlation id
    /// when the sender did not provide one.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EmptyField`] when a key component is blank.
    pub fn into_command(self) -> Result<Command, ProtocolError> {
        let device =
            DeviceKey::new(self.device).map_err(|_| ProtocolError::EmptyField { field: "device" })?;
        let channel = ChannelKey::new(self.channel)
            .map_err(|_| ProtocolError::EmptyField { field: "channel" })?;
        let property = PropertyName::new(self.property)
            .map_err(|_| ProtocolError::EmptyField { field: "property" })?;

        Ok(Command::external(
            PropertyKey::from_parts(device, channel, property),
            self.value,
            self.correlation_id.unwrap_or_default(),
        ))
    }
}

/// Decode a raw inbound message straight into a [`Command`].
///
/// # Errors
///
/// Returns a [`ProtocolError`] for malformed payloads or blank keys.
pub fn decode_command(raw: &str) -> Result<Command, ProtocolError> {
    InboundCommand::parse(raw)?.into_command()
}

/// Machine-readable reason for a negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckErrorCode {
    UnknownProperty,
    AccessDenied,
    ValidationFailed,
    Internal,
}

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckError {
    pub code: AckErrorCode,
    pub message: String,
}

impl From<&ConnectorError> for AckError {
    fn from(err: &ConnectorError) -> Self {
        let (code, message) = match err {
            ConnectorError::UnknownProperty(inner) => {
                (AckErrorCode::UnknownProperty, inner.to_string())
            }
            ConnectorError::Access(inner) => (AckErrorCode::AccessDenied, inner.to_string()),
            ConnectorError::Validation(inner) => (AckErrorCode::ValidationFailed, inner.to_string()),
            other => (AckErrorCode::Internal, other.to_string()),
        };
        Self { code, message }
    }
}

/// Positive or negative response to one inbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub correlation_id: CorrelationId,
    pub device: DeviceKey,
    pub channel: ChannelKey,
    pub property: PropertyName,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
}

impl Acknowledgement {
    /// The command was committed.
    #[must_use]
    pub fn accepted(command: &Command) -> Self {
        Self::build(command, None)
    }

    /// The command was refused.
    #[must_use]
    pub fn rejected(command: &Command, err: &ConnectorError) -> Self {
        Self::build(command, Some(AckError::from(err)))
    }

    fn build(command: &Command, error: Option<AckError>) -> Self {
        let key = command.target.clone();
        Self {
            correlation_id: command.correlation_id,
            device: key.device,
            channel: key.channel,
            property: key.property,
            accepted: error.is_none(),
            error,
        }
    }
}

/// A message sent to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A property value was committed.
    StateChanged {
        device: DeviceKey,
        channel: ChannelKey,
        property: PropertyName,
        previous: Option<PropertyValue>,
        value: PropertyValue,
        origin: Origin,
        timestamp: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<CorrelationId>,
    },
    /// Response to an inbound command.
    Ack(Acknowledgement),
    /// A device changed its connection state.
    ConnectionState {
        device: DeviceKey,
        state: ConnectionState,
        timestamp: Timestamp,
    },
}

impl From<&StateChange> for OutboundMessage {
    fn from(change: &StateChange) -> Self {
        let key = change.key.clone();
        Self::StateChanged {
            device: key.device,
            channel: key.channel,
            property: key.property,
            previous: change.previous.clone(),
            value: change.value.clone(),
            origin: change.origin,
            timestamp: change.timestamp,
            correlation_id: change.correlation_id,
        }
    }
}

impl From<&ConnectionChange> for OutboundMessage {
    fn from(change: &ConnectionChange) -> Self {
        Self::ConnectionState {
            device: change.device.clone(),
            state: change.state,
            timestamp: change.timestamp,
        }
    }
}

impl OutboundMessage {
    /// Serialize as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; never expected for these types.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vconnector_domain::error::{AccessError, ValidationError};
    use vconnector_domain::time::now;

    #[test]
    fn should_decode_command_with_correlation_id() {
        let id = CorrelationId::new();
        let raw = format!(
            r#"{{"device":"hall","channel":"thermostat","property":"targetTemp","value":22.5,"correlation_id":"{id}"}}"#
        );
        let cmd = decode_command(&raw).unwrap();
        assert_eq!(cmd.target.to_string(), "hall/thermostat/targetTemp");
        assert_eq!(cmd.value, PropertyValue::Float(22.5));
        assert_eq!(cmd.correlation_id, id);
        assert_eq!(cmd.origin, Origin::Command);
    }

    #[test]
    fn should_generate_correlation_id_when_missing() {
        let raw = r#"{"device":"hall","channel":"relay","property":"on","value":true}"#;
        assert!(decode_command(raw).is_ok());
    }

    #[test]
    fn should_reject_malformed_json() {
        let err = decode_command("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn should_reject_missing_value() {
        let raw = r#"{"device":"hall","channel":"relay","property":"on"}"#;
        assert!(matches!(decode_command(raw), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn should_reject_blank_channel() {
        let raw = r#"{"device":"hall","channel":"","property":"on","value":true}"#;
        let err = decode_command(raw).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyField { field: "channel" }));
    }

    #[test]
    fn should_map_errors_to_ack_codes() {
        let key = PropertyKey::new("d", "c", "p").unwrap();
        let access: ConnectorError = AccessError::ReadOnly { key }.into();
        assert_eq!(AckError::from(&access).code, AckErrorCode::AccessDenied);

        let validation: ConnectorError = ValidationError::NotFinite.into();
        assert_eq!(AckError::from(&validation).code, AckErrorCode::ValidationFailed);
    }

    #[test]
    fn should_serialize_state_change_with_type_tag() {
        let change = StateChange {
            key: PropertyKey::new("hall", "sensors", "temperature").unwrap(),
            previous: None,
            value: PropertyValue::Float(21.0),
            timestamp: now(),
            origin: Origin::Generated,
            correlation_id: None,
        };
        let json: serde_json::Value =
            serde_json::from_str(&OutboundMessage::from(&change).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["device"], "hall");
        assert_eq!(json["origin"], "generated");
        assert_eq!(json["value"], 21.0);
        assert!(json["previous"].is_null());
        assert!(json.get("correlation_id").is_none());
    }

    #[test]
    fn should_serialize_rejected_ack_with_error_code() {
        let cmd = decode_command(r#"{"device":"d","channel":"c","property":"p","value":1}"#).unwrap();
        let err: ConnectorError = ValidationError::NotFinite.into();
        let ack = OutboundMessage::Ack(Acknowledgement::rejected(&cmd, &err));
        let json: serde_json::Value = serde_json::from_str(&ack.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["accepted"], false);
        assert_eq!(json["error"]["code"], "validation_failed");
    }
}
