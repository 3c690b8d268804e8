//! Device — a virtual thing that exposes channels of properties.
//!
//! Definitions form a strict ownership tree: a device owns its channels, a
//! channel owns its properties. The registry is the only source of
//! definitions; the engine never invents devices.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::key::{ChannelKey, DeviceKey, PropertyKey};
use crate::property::PropertyDefinition;
use crate::time::Timestamp;

/// Functional category of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCategory {
    Sensor,
    Switch,
    Actor,
    Opening,
    Preset,
    /// Drives the thermostat controller for its device.
    Thermostat,
    #[default]
    #[serde(other)]
    Generic,
}

/// A channel and the properties it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub key: ChannelKey,
    #[serde(default)]
    pub category: ChannelCategory,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

/// A virtual device as reported by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub key: DeviceKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelDefinition>,
}

impl DeviceDefinition {
    /// Validate names and the ownership tree.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDefinition`] for an empty display
    /// name, duplicate channel keys or duplicate property names within a
    /// channel, and propagates property-level validation errors.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidDefinition {
                key: self.key.to_string(),
                reason: "device name must not be empty",
            });
        }

        let mut channels = HashSet::new();
        for channel in &self.channels {
            if !channels.insert(&channel.key) {
                return Err(ValidationError::InvalidDefinition {
                    key: format!("{}/{}", self.key, channel.key),
                    reason: "duplicate channel key",
                });
            }

            let mut names = HashSet::new();
            for property in &channel.properties {
                if !names.insert(&property.name) {
                    return Err(ValidationError::InvalidDefinition {
                        key: format!("{}/{}/{}", self.key, channel.key, property.name),
                        reason: "duplicate property name",
                    });
                }
                property.validate()?;
            }
        }
        Ok(())
    }

    /// Iterate over every property with its full key.
    pub fn properties(&self) -> impl Iterator<Item = (PropertyKey, &PropertyDefinition)> {
        self.channels.iter().flat_map(move |channel| {
            channel.properties.iter().map(move |property| {
                (
                    PropertyKey::from_parts(
                        self.key.clone(),
                        channel.key.clone(),
                        property.name.clone(),
                    ),
                    property,
                )
            })
        })
    }
}

/// Connection state of a device, mirrored to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    #[default]
    Unknown,
    /// The device is misconfigured and skipped until redefined.
    Alert,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Unknown => f.write_str("unknown"),
            Self::Alert => f.write_str("alert"),
        }
    }
}

/// A committed device connection transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionChange {
    pub device: DeviceKey,
    pub previous: ConnectionState,
    pub state: ConnectionState,
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;

    fn property(name: &str) -> PropertyDefinition {
        PropertyDefinition::builder()
            .name(name)
            .data_type(DataType::Bool)
            .build()
            .unwrap()
    }

    fn device(channels: Vec<ChannelDefinition>) -> DeviceDefinition {
        DeviceDefinition {
            key: DeviceKey::new("lamp").unwrap(),
            name: "Lamp".to_string(),
            model: None,
            channels,
        }
    }

    fn channel(key: &str, properties: Vec<PropertyDefinition>) -> ChannelDefinition {
        ChannelDefinition {
            key: ChannelKey::new(key).unwrap(),
            category: ChannelCategory::Switch,
            properties,
        }
    }

    #[test]
    fn should_list_properties_with_full_keys() {
        let dev = device(vec![
            channel("relay", vec![property("on")]),
            channel("led", vec![property("on"), property("blink")]),
        ]);
        let keys: Vec<String> = dev.properties().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["lamp/relay/on", "lamp/led/on", "lamp/led/blink"]);
    }

    #[test]
    fn should_reject_duplicate_channel_keys() {
        let dev = device(vec![channel("relay", vec![]), channel("relay", vec![])]);
        assert!(dev.validate().is_err());
    }

    #[test]
    fn should_reject_duplicate_property_names() {
        let dev = device(vec![channel("relay", vec![property("on"), property("on")])]);
        assert!(dev.validate().is_err());
    }

    #[test]
    fn should_allow_same_property_name_in_different_channels() {
        let dev = device(vec![
            channel("relay", vec![property("on")]),
            channel("led", vec![property("on")]),
        ]);
        assert!(dev.validate().is_ok());
    }

    #[test]
    fn should_reject_blank_device_name() {
        let mut dev = device(vec![]);
        dev.name = " ".to_string();
        assert!(dev.validate().is_err());
    }

    #[test]
    fn should_fall_back_to_generic_category_for_unknown_names() {
        let category: ChannelCategory = serde_json::from_str("\"weather\"").unwrap();
        assert_eq!(category, ChannelCategory::Generic);
    }

    #[test]
    fn should_default_connection_state_to_unknown() {
        assert_eq!(ConnectionState::default(), ConnectionState::Unknown);
        assert_eq!(ConnectionState::Alert.to_string(), "alert");
    }
}
