//! Generation rules — how the engine produces values for simulated properties.
//!
//! The rule set is closed: every generated property carries exactly one of
//! these variants together with its parameters. Evaluation lives in the
//! application layer; this module only describes the rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// Describes how a generated property changes on every scheduler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationRule {
    /// Boolean flips each tick.
    Toggle,
    /// Number grows by `step`, wrapping to the range minimum past the maximum.
    Increment { step: f64 },
    /// Uniform draw from the range (optionally narrowed here), or a random
    /// enum member / boolean.
    Random {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Cycles through `values` in order, wrapping at the end.
    Pattern { values: Vec<PropertyValue> },
}

impl GenerationRule {
    /// Stable rule name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::Increment { .. } => "increment",
            Self::Random { .. } => "random",
            Self::Pattern { .. } => "pattern",
        }
    }
}

impl fmt::Display for GenerationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increment { step } => write!(f, "increment({step})"),
            Self::Pattern { values } => write!(f, "pattern({} values)", values.len()),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_deserialize_increment_with_step() {
        let rule: GenerationRule = serde_json::from_str(r#"{"type":"increment","step":2}"#).unwrap();
        assert_eq!(rule, GenerationRule::Increment { step: 2.0 });
    }

    #[test]
    fn should_deserialize_random_without_bounds() {
        let rule: GenerationRule = serde_json::from_str(r#"{"type":"random"}"#).unwrap();
        assert_eq!(rule, GenerationRule::Random { min: None, max: None });
    }

    #[test]
    fn should_deserialize_pattern_values() {
        let rule: GenerationRule =
            serde_json::from_str(r#"{"type":"pattern","values":["a","b"]}"#).unwrap();
        assert_eq!(
            rule,
            GenerationRule::Pattern {
                values: vec![
                    PropertyValue::String("a".to_string()),
                    PropertyValue::String("b".to_string()),
                ]
            }
        );
    }

    #[test]
    fn should_display_rule_with_parameters() {
        assert_eq!(GenerationRule::Toggle.to_string(), "toggle");
        assert_eq!(GenerationRule::Increment { step: 0.5 }.to_string(), "increment(0.5)");
    }
}
