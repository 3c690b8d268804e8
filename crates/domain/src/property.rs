//! Property — the smallest piece of device state.
//!
//! A property's [`AccessMode`] fixes its single writer path:
//! read-write properties are written only by external commands, read-only
//! properties only by the engine (value generation or a device controller).
//! A property with a [`GenerationRule`] is therefore always read-only.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::generation::GenerationRule;
use crate::key::PropertyName;
use crate::value::{DataType, PropertyValue};

/// Who may write a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Engine-written; external commands are rejected.
    ReadOnly,
    /// Command-written; the engine never touches it.
    ReadWrite,
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    /// Whether `value` lies within the bounds.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Nearest value within the bounds.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Structural definition of a property as provided by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: PropertyName,
    pub data_type: DataType,
    pub access: AccessMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<NumericRange>,
    /// Allowed members of an [`DataType::Enum`] property.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationRule>,
    /// Value the store starts with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<PropertyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl PropertyDefinition {
    /// Start building a new property definition.
    #[must_use]
    pub fn builder() -> PropertyDefinitionBuilder {
        PropertyDefinitionBuilder::default()
    }

    /// Whether the engine's value generator drives this property.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.generation.is_some()
    }

    /// Whether external commands may write this property.
    #[must_use]
    pub fn accepts_commands(&self) -> bool {
        self.access == AccessMode::ReadWrite
    }

    /// Check that `value` satisfies the declared type, range and enum set.
    ///
    /// Returns the value normalised to the declared type (an integer written
    /// to a float property becomes a float).
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] the value violates.
    pub fn check_value(&self, value: &PropertyValue) -> Result<PropertyValue, ValidationError> {
        let mismatch = || ValidationError::TypeMismatch {
            expected: self.data_type,
            actual: value.kind(),
        };

        match (self.data_type, value) {
            (DataType::Bool, PropertyValue::Bool(_)) | (DataType::String, PropertyValue::String(_)) => {
                Ok(value.clone())
            }
            (DataType::Int, PropertyValue::Int(_)) => {
                self.check_range(value.as_f64().ok_or_else(mismatch)?)?;
                Ok(value.clone())
            }
            (DataType::Float, PropertyValue::Int(_) | PropertyValue::Float(_)) => {
                let v = value.as_f64().ok_or_else(mismatch)?;
                if !v.is_finite() {
                    return Err(ValidationError::NotFinite);
                }
                self.check_range(v)?;
                Ok(PropertyValue::Float(v))
            }
            (DataType::Enum, PropertyValue::String(v)) => {
                if self.values.iter().any(|member| member == v) {
                    Ok(value.clone())
                } else {
                    Err(ValidationError::NotInEnum { value: v.clone() })
                }
            }
            _ => Err(mismatch()),
        }
    }

    fn check_range(&self, value: f64) -> Result<(), ValidationError> {
        match self.range {
            Some(range) if !range.contains(value) => Err(ValidationError::OutOfRange {
                value,
                min: range.min,
                max: range.max,
            }),
            _ => Ok(()),
        }
    }

    /// Validate the definition's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDefinition`] describing the first
    /// inconsistency found, or the error of an invalid initial value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason| ValidationError::InvalidDefinition {
            key: self.name.to_string(),
            reason,
        };

        if self.data_type == DataType::Enum && self.values.is_empty() {
            return Err(invalid("enum property declares no values"));
        }
        if self.data_type != DataType::Enum && !self.values.is_empty() {
            return Err(invalid("only enum properties may declare values"));
        }
        if let Some(range) = self.range {
            if !self.data_type.is_numeric() {
                return Err(invalid("only numeric properties may declare a range"));
            }
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(invalid("range bounds are not ordered finite numbers"));
            }
        }
        if let Some(rule) = &self.generation {
            if self.access != AccessMode::ReadOnly {
                return Err(invalid("generated properties must be read-only"));
            }
            self.validate_rule(rule).map_err(invalid)?;
        }
        if let Some(initial) = &self.initial {
            self.check_value(initial)?;
        }
        Ok(())
    }

    fn validate_rule(&self, rule: &GenerationRule) -> Result<(), &'static str> {
        match rule {
            GenerationRule::Toggle if self.data_type != DataType::Bool => {
                Err("toggle requires a bool property")
            }
            GenerationRule::Increment { step } => {
                if !self.data_type.is_numeric() {
                    Err("increment requires a numeric property")
                } else if !step.is_finite() || *step == 0.0 {
                    Err("increment step must be a non-zero finite number")
                } else if self.data_type == DataType::Int && step.fract() != 0.0 {
                    Err("increment step must be integral for int properties")
                } else {
                    Ok(())
                }
            }
            GenerationRule::Random { min, max } => {
                if self.data_type == DataType::String {
                    return Err("random cannot generate free-form strings");
                }
                match (min, max) {
                    (Some(min), Some(max)) if min > max => Err("random bounds are not ordered"),
                    _ => Ok(()),
                }
            }
            GenerationRule::Pattern { values } if values.is_empty() => {
                Err("pattern declares no values")
            }
            _ => Ok(()),
        }
    }
}

/// Builder for [`PropertyDefinition`].
///
/// Access defaults to read-only for generated properties and read-write
/// otherwise.
#[derive(Debug, Default)]
pub struct PropertyDefinitionBuilder {
    name: Option<String>,
    data_type: Option<DataType>,
    access: Option<AccessMode>,
    range: Option<NumericRange>,
    values: Vec<String>,
    generation: Option<GenerationRule>,
    initial: Option<PropertyValue>,
    unit: Option<String>,
}

impl PropertyDefinitionBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    #[must_use]
    pub fn access(mut self, access: AccessMode) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some(NumericRange { min, max });
        self
    }

    #[must_use]
    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn generation(mut self, rule: GenerationRule) -> Self {
        self.generation = Some(rule);
        self
    }

    #[must_use]
    pub fn initial(mut self, value: PropertyValue) -> Self {
        self.initial = Some(value);
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Build and validate the definition.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyKey`] without a name and
    /// [`ValidationError::InvalidDefinition`] for inconsistent settings.
    pub fn build(self) -> Result<PropertyDefinition, ValidationError> {
        let name = PropertyName::new(self.name.unwrap_or_default())?;
        let data_type = self.data_type.ok_or_else(|| ValidationError::InvalidDefinition {
            key: name.to_string(),
            reason: "data type is required",
        })?;
        let access = self.access.unwrap_or(if self.generation.is_some() {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        });

        let definition = PropertyDefinition {
            name,
            data_type,
            access,
            range: self.range,
            values: self.values,
            generation: self.generation,
            initial: self.initial,
            unit: self.unit,
        };
        definition.validate()?;
        Ok(definition)
    }
}
