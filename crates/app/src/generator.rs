//! Value generator — produces the next value of a generated property.
//!
//! Generation never reads or writes the store: it maps a rule, a definition
//! and the previous value to a new value. Results are clamped into the
//! property's declared constraints so a rule can never propose an illegal
//! value; rules that cannot apply at all (wrong data type, no bounds to draw
//! from) fail with a [`GenerationError`].

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use vconnector_domain::error::GenerationError;
use vconnector_domain::generation::GenerationRule;
use vconnector_domain::property::{NumericRange, PropertyDefinition};
use vconnector_domain::value::{DataType, PropertyValue};

/// Rule evaluator with its own random source.
pub struct ValueGenerator {
    rng: Mutex<StdRng>,
}

impl Default for ValueGenerator {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl ValueGenerator {
    /// Generator seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic generator, for reproducible simulations and tests.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Compute the next value for `definition` under `rule`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError`] when the rule does not fit the property's
    /// data type or lacks the bounds it needs.
    pub fn next(
        &self,
        rule: &GenerationRule,
        definition: &PropertyDefinition,
        previous: Option<&PropertyValue>,
    ) -> Result<PropertyValue, GenerationError> {
        let unsupported = || GenerationError::Unsupported {
            rule: rule.name(),
            data_type: definition.data_type,
        };

        let value = match rule {
            GenerationRule::Toggle => match definition.data_type {
                DataType::Bool => {
                    PropertyValue::Bool(!previous.and_then(PropertyValue::as_bool).unwrap_or(false))
                }
                _ => return Err(unsupported()),
            },
            GenerationRule::Increment { step } => match definition.data_type {
                DataType::Int => increment_int(definition.range, previous, *step),
                DataType::Float => increment_float(definition.range, previous, *step),
                _ => return Err(unsupported()),
            },
            GenerationRule::Random { min, max } => self.random(definition, *min, *max, rule)?,
            GenerationRule::Pattern { values } => pattern(definition, values, previous)?,
        };

        Ok(clamp(definition, value))
    }

    fn random(
        &self,
        definition: &PropertyDefinition,
        min: Option<f64>,
        max: Option<f64>,
        rule: &GenerationRule,
    ) -> Result<PropertyValue, GenerationError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        match definition.data_type {
            DataType::Bool => Ok(PropertyValue::Bool(rng.gen_bool(0.5))),
            DataType::Enum => definition
                .values
                .choose(&mut *rng)
                .map(|member| PropertyValue::String(member.clone()))
                .ok_or(GenerationError::Unsupported {
                    rule: rule.name(),
                    data_type: DataType::Enum,
                }),
            DataType::Int | DataType::Float => {
                let bounds = random_bounds(definition.range, min, max)
                    .ok_or(GenerationError::MissingRange { rule: rule.name() })?;
                if definition.data_type == DataType::Int {
                    let (lo, hi) = int_bounds(bounds);
                    Ok(PropertyValue::Int(if lo >= hi { lo } else { rng.gen_range(lo..=hi) }))
                } else if bounds.min >= bounds.max {
                    Ok(PropertyValue::Float(bounds.min))
                } else {
                    Ok(PropertyValue::Float(rng.gen_range(bounds.min..=bounds.max)))
                }
            }
            DataType::String => Err(GenerationError::Unsupported {
                rule: rule.name(),
                data_type: DataType::String,
            }),
        }
    }
}

/// Bounds for a random draw: the rule's own bounds narrowed to the declared
/// range. Falls back to the declared range when the two do not overlap.
fn random_bounds(
    declared: Option<NumericRange>,
    min: Option<f64>,
    max: Option<f64>,
) -> Option<NumericRange> {
    let lo = match (min, declared) {
        (Some(m), Some(r)) => m.max(r.min),
        (Some(m), None) => m,
        (None, Some(r)) => r.min,
        (None, None) => return None,
    };
    let hi = match (max, declared) {
        (Some(m), Some(r)) => m.min(r.max),
        (Some(m), None) => m,
        (None, Some(r)) => r.max,
        (None, None) => return None,
    };
    if lo <= hi {
        Some(NumericRange { min: lo, max: hi })
    } else {
        declared
    }
}

#[allow(clippy::cast_possible_truncation)]
fn int_bounds(range: NumericRange) -> (i64, i64) {
    (range.min.ceil() as i64, range.max.floor() as i64)
}

#[allow(clippy::cast_possible_truncation)]
fn int_value(value: &PropertyValue) -> Option<i64> {
    match value {
        PropertyValue::Int(v) => Some(*v),
        PropertyValue::Float(v) => Some(*v as i64),
        PropertyValue::Bool(_) | PropertyValue::String(_) => None,
    }
}

/// Wrapping increment, computed in `i128` so neither the span of an `i64`
/// range nor a huge step can overflow.
#[allow(clippy::cast_possible_truncation)]
fn increment_int(
    range: Option<NumericRange>,
    previous: Option<&PropertyValue>,
    step: f64,
) -> PropertyValue {
    match range {
        Some(range) => {
            let (min, max) = int_bounds(range);
            let current = previous.and_then(int_value).unwrap_or(min);
            let (min, max, current) = (i128::from(min), i128::from(max), i128::from(current));
            let span = (max - min + 1).max(1);
            let step = (step as i128).rem_euclid(span);
            let next = min + (current - min + step).rem_euclid(span);
            PropertyValue::Int(i64::try_from(next).unwrap_or(i64::MAX))
        }
        None => {
            let current = previous.and_then(int_value).unwrap_or(0);
            PropertyValue::Int(current.saturating_add(step as i64))
        }
    }
}

fn increment_float(range: Option<NumericRange>, previous: Option<&PropertyValue>, step: f64) -> PropertyValue {
    let start = range.map_or(0.0, |r| r.min);
    let next = previous.and_then(PropertyValue::as_f64).unwrap_or(start) + step;
    match range {
        Some(range) if !range.contains(next) => {
            let span = range.max - range.min;
            if span > 0.0 {
                PropertyValue::Float(range.min + (next - range.min).rem_euclid(span))
            } else {
                PropertyValue::Float(range.min)
            }
        }
        _ => PropertyValue::Float(next),
    }
}

fn pattern(
    definition: &PropertyDefinition,
    values: &[PropertyValue],
    previous: Option<&PropertyValue>,
) -> Result<PropertyValue, GenerationError> {
    let sequence = values
        .iter()
        .map(|v| coerce(definition.data_type, v))
        .collect::<Result<Vec<_>, _>>()?;

    let next_index = previous
        .and_then(|prev| sequence.iter().position(|v| v == prev))
        .map_or(0, |i| (i + 1) % sequence.len());

    sequence
        .into_iter()
        .nth(next_index)
        .ok_or(GenerationError::Unsupported {
            rule: "pattern",
            data_type: definition.data_type,
        })
}

/// Bring a configured value into the property's data type.
#[allow(clippy::cast_possible_truncation)]
fn coerce(data_type: DataType, value: &PropertyValue) -> Result<PropertyValue, GenerationError> {
    let invalid = GenerationError::PatternValue { data_type };
    match (data_type, value) {
        (DataType::Bool, PropertyValue::Bool(_))
        | (DataType::Int, PropertyValue::Int(_))
        | (DataType::Enum | DataType::String, PropertyValue::String(_)) => Ok(value.clone()),
        (DataType::Int, PropertyValue::Float(v)) if v.fract() == 0.0 => {
            Ok(PropertyValue::Int(*v as i64))
        }
        (DataType::Float, PropertyValue::Int(_) | PropertyValue::Float(_)) => {
            value.as_f64().map(PropertyValue::Float).ok_or(invalid)
        }
        _ => Err(invalid),
    }
}

/// Nearest legal value: numbers are clamped into the range, unknown enum
/// members fall back to the first declared member.
#[allow(clippy::cast_possible_truncation)]
fn clamp(definition: &PropertyDefinition, value: PropertyValue) -> PropertyValue {
    match (value, definition.range) {
        (PropertyValue::Int(v), Some(range)) => {
            let (min, max) = int_bounds(range);
            PropertyValue::Int(v.clamp(min, max.max(min)))
        }
        (PropertyValue::Float(v), Some(range)) => PropertyValue::Float(range.clamp(v)),
        (PropertyValue::String(v), _) if definition.data_type == DataType::Enum => {
            if definition.values.contains(&v) {
                PropertyValue::String(v)
            } else {
                definition
                    .values
                    .first()
                    .map_or(PropertyValue::String(v), |first| PropertyValue::String(first.clone()))
            }
        }
        (value, _) => value,
    }
}
