//! Registry-assigned string keys.
//!
//! Devices, channels and properties are identified by the stable keys the
//! registry gives them. A channel key is only unique within its device and a
//! property name only within its channel, so the store addresses properties
//! by the full [`PropertyKey`] path.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! define_key {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a key, rejecting empty or whitespace-only input.
            ///
            /// # Errors
            ///
            /// Returns [`ValidationError::EmptyKey`] when `value` is blank.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(ValidationError::EmptyKey);
                }
                Ok(Self(value))
            }

            /// Borrow the key text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0
            }
        }
    };
}

define_key!(
    /// Stable key of a [`DeviceDefinition`](crate::device::DeviceDefinition).
    DeviceKey
);

define_key!(
    /// Key of a channel, unique within its device.
    ChannelKey
);

define_key!(
    /// Name of a property, unique within its channel.
    PropertyName
);

/// Full path to a property: device, channel, property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyKey {
    pub device: DeviceKey,
    pub channel: ChannelKey,
    pub property: PropertyName,
}

impl PropertyKey {
    /// Build a key from its three components.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyKey`] if any component is blank.
    pub fn new(
        device: impl Into<String>,
        channel: impl Into<String>,
        property: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            device: DeviceKey::new(device)?,
            channel: ChannelKey::new(channel)?,
            property: PropertyName::new(property)?,
        })
    }

    /// Assemble a key from already-validated components.
    #[must_use]
    pub fn from_parts(device: DeviceKey, channel: ChannelKey, property: PropertyName) -> Self {
        Self {
            device,
            channel,
            property,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.device, self.channel, self.property)
    }
}
