//! On-disk schema of the definitions file.
//!
//! ```toml
//! [connector]
//! tick_interval_ms = 2000
//!
//! [[devices]]
//! key = "hall"
//! name = "Hall sensor"
//!
//! [[devices.channels]]
//! key = "sensors"
//! category = "sensor"
//!
//! [[devices.channels.properties]]
//! name = "temperature"
//! data_type = "float"
//! min = 0.0
//! max = 100.0
//! generation = { type = "random" }
//! ```

use std::time::Duration;

use serde::Deserialize;

use vconnector_app::ports::ConnectorSettings;
use vconnector_domain::device::{ChannelCategory, ChannelDefinition, DeviceDefinition};
use vconnector_domain::error::ValidationError;
use vconnector_domain::generation::GenerationRule;
use vconnector_domain::key::{ChannelKey, DeviceKey};
use vconnector_domain::property::{AccessMode, PropertyDefinition};
use vconnector_domain::value::{DataType, PropertyValue};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RegistryFile {
    #[serde(default)]
    pub connector: ConnectorSection,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConnectorSection {
    pub tick_interval_ms: Option<u64>,
}

impl ConnectorSection {
    pub fn settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            tick_interval: self
                .tick_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceEntry {
    pub key: String,
    pub name: String,
    pub model: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelEntry {
    key: String,
    #[serde(default)]
    category: ChannelCategory,
    #[serde(default)]
    properties: Vec<PropertyEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PropertyEntry {
    name: String,
    data_type: DataType,
    access: Option<AccessMode>,
    min: Option<f64>,
    max: Option<f64>,
    #[serde(default)]
    values: Vec<String>,
    generation: Option<GenerationRule>,
    initial: Option<PropertyValue>,
    unit: Option<String>,
}

impl DeviceEntry {
    /// Convert into a domain definition, validating the whole device.
    pub fn into_definition(self) -> Result<DeviceDefinition, ValidationError> {
        let channels = self
            .channels
            .into_iter()
            .map(ChannelEntry::into_definition)
            .collect::<Result<_, _>>()?;

        let definition = DeviceDefinition {
            key: DeviceKey::new(self.key)?,
            name: self.name,
            model: self.model,
            channels,
        };
        definition.validate()?;
        Ok(definition)
    }
}

impl ChannelEntry {
    fn into_definition(self) -> Result<ChannelDefinition, ValidationError> {
        let properties = self
            .properties
            .into_iter()
            .map(PropertyEntry::into_definition)
            .collect::<Result<_, _>>()?;

        Ok(ChannelDefinition {
            key: ChannelKey::new(self.key)?,
            category: self.category,
            properties,
        })
    }
}

impl PropertyEntry {
    fn into_definition(self) -> Result<PropertyDefinition, ValidationError> {
        let mut builder = PropertyDefinition::builder()
            .name(self.name.clone())
            .data_type(self.data_type)
            .values(self.values);

        match (self.min, self.max) {
            (Some(min), Some(max)) => builder = builder.range(min, max),
            (None, None) => {}
            _ => {
                return Err(ValidationError::InvalidDefinition {
                    key: self.name,
                    reason: "range needs both min and max",
                });
            }
        }
        if let Some(access) = self.access {
            builder = builder.access(access);
        }
        if let Some(rule) = self.generation {
            builder = builder.generation(rule);
        }
        if let Some(initial) = self.initial {
            builder = builder.initial(initial);
        }
        if let Some(unit) = self.unit {
            builder = builder.unit(unit);
        }

        builder.build()
    }
}
