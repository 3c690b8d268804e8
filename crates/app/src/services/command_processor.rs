//! Command processor — validates and applies write requests.

use std::sync::Arc;

use vconnector_domain::command::{Command, Origin};
use vconnector_domain::error::{AccessError, ConnectorError, UnknownPropertyError};
use vconnector_domain::state_change::StateChange;

use crate::store::DeviceStateStore;

/// Applies [`Command`]s to the [`DeviceStateStore`], enforcing each
/// property's single writer path.
///
/// External commands may only write read-write properties; engine-generated
/// commands may only write read-only ones. Both are value-checked, so a
/// faulty generation rule cannot corrupt state.
pub struct CommandProcessor {
    store: Arc<DeviceStateStore>,
}

impl CommandProcessor {
    /// Create a processor over the given store.
    pub fn new(store: Arc<DeviceStateStore>) -> Self {
        Self { store }
    }

    /// The store this processor writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<DeviceStateStore> {
        &self.store
    }

    /// Handle one command.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::UnknownProperty`] if the target does not exist
    /// - [`ConnectorError::Access`] if the origin is not the property's writer
    /// - [`ConnectorError::Validation`] if the value breaks type, range or
    ///   enum constraints
    pub fn handle(&self, command: &Command) -> Result<StateChange, ConnectorError> {
        let key = &command.target;
        let definition = self
            .store
            .definition(key)
            .ok_or_else(|| UnknownPropertyError { key: key.clone() })?;

        match command.origin {
            Origin::Command if !definition.accepts_commands() => {
                return Err(AccessError::ReadOnly { key: key.clone() }.into());
            }
            Origin::Generated if definition.accepts_commands() => {
                return Err(AccessError::CommandOnly { key: key.clone() }.into());
            }
            _ => {}
        }

        let correlation_id = match command.origin {
            Origin::Command => Some(command.correlation_id),
            Origin::Generated => None,
        };

        let change = self
            .store
            .apply(key, &command.value, command.origin, correlation_id)?;

        tracing::debug!(
            property = %key,
            origin = %command.origin,
            value = %change.value,
            "property committed"
        );

        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{hall_device, target_temp, temperature};
    use vconnector_domain::id::CorrelationId;
    use vconnector_domain::key::PropertyKey;
    use vconnector_domain::value::PropertyValue;

    fn processor() -> (CommandProcessor, Arc<DeviceStateStore>) {
        let store = Arc::new(DeviceStateStore::new());
        store.upsert_device(hall_device()).unwrap();
        (CommandProcessor::new(Arc::clone(&store)), store)
    }

    fn external(key: PropertyKey, value: PropertyValue) -> Command {
        Command::external(key, value, CorrelationId::new())
    }

    #[test]
    fn should_commit_external_command_on_read_write_property() {
        let (processor, store) = processor();
        let cmd = external(target_temp(), PropertyValue::Float(22.5));

        let change = processor.handle(&cmd).unwrap();

        assert_eq!(change.origin, Origin::Command);
        assert_eq!(change.correlation_id, Some(cmd.correlation_id));
        assert_eq!(change.previous, Some(PropertyValue::Float(20.0)));
        assert_eq!(store.get(&target_temp()), Some(PropertyValue::Float(22.5)));
    }

    #[test]
    fn should_reject_out_of_range_command_and_keep_value() {
        let (processor, store) = processor();
        processor
            .handle(&external(target_temp(), PropertyValue::Float(22.5)))
            .unwrap();

        let result = processor.handle(&external(target_temp(), PropertyValue::Int(150)));

        assert!(matches!(result, Err(ConnectorError::Validation(_))));
        assert_eq!(store.get(&target_temp()), Some(PropertyValue::Float(22.5)));
    }

    #[test]
    fn should_reject_external_command_on_generated_property() {
        let (processor, store) = processor();
        let result = processor.handle(&external(temperature(), PropertyValue::Float(50.0)));

        assert!(matches!(
            result,
            Err(ConnectorError::Access(AccessError::ReadOnly { .. }))
        ));
        assert_eq!(store.get(&temperature()), None);
    }

    #[test]
    fn should_accept_generated_command_on_read_only_property() {
        let (processor, _) = processor();
        let change = processor
            .handle(&Command::generated(temperature(), PropertyValue::Float(50.0)))
            .unwrap();
        assert_eq!(change.origin, Origin::Generated);
        assert_eq!(change.correlation_id, None);
    }

    #[test]
    fn should_reject_generated_command_on_read_write_property() {
        let (processor, _) = processor();
        let result = processor.handle(&Command::generated(target_temp(), PropertyValue::Float(22.0)));
        assert!(matches!(
            result,
            Err(ConnectorError::Access(AccessError::CommandOnly { .. }))
        ));
    }

    #[test]
    fn should_still_validate_generated_values() {
        let (processor, store) = processor();
        let result = processor.handle(&Command::generated(temperature(), PropertyValue::Float(101.0)));
        assert!(matches!(result, Err(ConnectorError::Validation(_))));
        assert_eq!(store.get(&temperature()), None);
    }

    #[test]
    fn should_reject_unknown_property() {
        let (processor, _) = processor();
        let key = PropertyKey::new("attic", "sensors", "temperature").unwrap();
        let result = processor.handle(&external(key, PropertyValue::Float(1.0)));
        assert!(matches!(result, Err(ConnectorError::UnknownProperty(_))));
    }
}
