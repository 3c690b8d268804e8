//! State change — an immutable record of a committed property transition.

use serde::{Deserialize, Serialize};

use crate::command::Origin;
use crate::id::CorrelationId;
use crate::key::PropertyKey;
use crate::time::Timestamp;
use crate::value::PropertyValue;

/// A committed property write.
///
/// Every successful write produces one, even when the value did not
/// actually change, so that each caller can observe its own commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub key: PropertyKey,
    pub previous: Option<PropertyValue>,
    pub value: PropertyValue,
    pub timestamp: Timestamp,
    pub origin: Origin,
    /// Set for command-origin changes so acknowledgements can be matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl StateChange {
    /// Whether the committed value differs from the previous one.
    #[must_use]
    pub fn is_transition(&self) -> bool {
        self.previous.as_ref() != Some(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;

    fn change(previous: Option<PropertyValue>, value: PropertyValue) -> StateChange {
        StateChange {
            key: PropertyKey::new("d", "c", "p").unwrap(),
            previous,
            value,
            timestamp: now(),
            origin: Origin::Command,
            correlation_id: None,
        }
    }

    #[test]
    fn should_report_transition_when_value_differs() {
        let c = change(Some(PropertyValue::Bool(false)), PropertyValue::Bool(true));
        assert!(c.is_transition());
    }

    #[test]
    fn should_report_transition_from_no_value() {
        let c = change(None, PropertyValue::Bool(true));
        assert!(c.is_transition());
    }

    #[test]
    fn should_not_report_transition_when_value_repeats() {
        let c = change(Some(PropertyValue::Int(3)), PropertyValue::Int(3));
        assert!(!c.is_transition());
    }
}
