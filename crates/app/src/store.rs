//! Device state store — authoritative in-memory state of every virtual device.
//!
//! Structure (which devices, channels and properties exist) sits behind two
//! `RwLock`ed maps that are only held long enough to clone an `Arc`. Each
//! property's value lives behind its own `Mutex`, so writes to different
//! properties never contend and writes to the same property are serialized.
//! The per-property critical section covers validate + commit only.
//!
//! Publishing happens outside that section. Callers that need a property's
//! events to leave in commit order take its emission turn first (see
//! [`DeviceStateStore::emission_turn`]).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use vconnector_domain::command::Origin;
use vconnector_domain::device::{
    ChannelCategory, ConnectionChange, ConnectionState, DeviceDefinition,
};
use vconnector_domain::error::{ConnectorError, UnknownPropertyError, ValidationError};
use vconnector_domain::id::CorrelationId;
use vconnector_domain::key::{ChannelKey, DeviceKey, PropertyKey};
use vconnector_domain::property::PropertyDefinition;
use vconnector_domain::state_change::StateChange;
use vconnector_domain::time::{Timestamp, not_before, now};
use vconnector_domain::value::PropertyValue;

#[derive(Debug, Default)]
struct PropertyState {
    value: Option<PropertyValue>,
    last_changed: Option<Timestamp>,
    /// Set when the owning device is removed or redefined; late writers
    /// holding the old slot must not commit.
    retired: bool,
}

#[derive(Debug)]
struct PropertySlot {
    definition: PropertyDefinition,
    state: Mutex<PropertyState>,
    emission: Arc<AsyncMutex<()>>,
}

impl PropertySlot {
    fn lock(&self) -> MutexGuard<'_, PropertyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct DeviceSlot {
    definition: DeviceDefinition,
    connection: Mutex<ConnectionState>,
}

/// Read-only view of one property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertySnapshot {
    pub key: PropertyKey,
    pub definition: PropertyDefinition,
    pub value: Option<PropertyValue>,
    pub last_changed: Option<Timestamp>,
}

/// Read-only view of one channel and its properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub key: ChannelKey,
    pub category: ChannelCategory,
    pub properties: Vec<PropertySnapshot>,
}

/// Read-only view of a device tree, as returned by [`DeviceStateStore::describe`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub key: DeviceKey,
    pub name: String,
    pub model: Option<String>,
    pub connection: ConnectionState,
    pub channels: Vec<ChannelSnapshot>,
}

impl DeviceSnapshot {
    /// Find a channel by key.
    #[must_use]
    pub fn channel(&self, key: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.key.as_str() == key)
    }

    /// Current value of `channel/property`, if set.
    #[must_use]
    pub fn value(&self, channel: &str, property: &str) -> Option<&PropertyValue> {
        self.channel(channel)?
            .properties
            .iter()
            .find(|p| p.key.property.as_str() == property)?
            .value
            .as_ref()
    }
}

/// What [`DeviceStateStore::upsert_device`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
}

/// Thread-safe in-memory device/channel/property state.
#[derive(Debug, Default)]
pub struct DeviceStateStore {
    devices: RwLock<BTreeMap<DeviceKey, Arc<DeviceSlot>>>,
    properties: RwLock<BTreeMap<PropertyKey, Arc<PropertySlot>>>,
}

impl DeviceStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device, or replace its definition.
    ///
    /// On replacement, values of properties whose key survives and whose
    /// stored value still satisfies the new definition are carried over;
    /// everything else restarts from its initial value. The connection
    /// state is reset to [`ConnectionState::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the definition is inconsistent; the
    /// store is left untouched.
    pub fn upsert_device(&self, definition: DeviceDefinition) -> Result<UpsertOutcome, ValidationError> {
        definition.validate()?;

        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let mut properties = self.properties.write().unwrap_or_else(PoisonError::into_inner);

        let previous = devices.remove(&definition.key);
        let mut carried: BTreeMap<PropertyKey, PropertyState> = BTreeMap::new();
        if let Some(old) = &previous {
            for (key, _) in old.definition.properties() {
                if let Some(slot) = properties.remove(&key) {
                    let mut state = slot.lock();
                    state.retired = true;
                    carried.insert(
                        key,
                        PropertyState {
                            value: state.value.take(),
                            last_changed: state.last_changed,
                            retired: false,
                        },
                    );
                }
            }
        }

        for (key, property) in definition.properties() {
            let state = match carried.remove(&key) {
                Some(state)
                    if state
                        .value
                        .as_ref()
                        .is_some_and(|v| property.check_value(v).is_ok()) =>
                {
                    state
                }
                _ => PropertyState {
                    value: property.initial.clone(),
                    last_changed: property.initial.as_ref().map(|_| now()),
                    retired: false,
                },
            };
            properties.insert(
                key,
                Arc::new(PropertySlot {
                    definition: property.clone(),
                    state: Mutex::new(state),
                    emission: Arc::new(AsyncMutex::new(())),
                }),
            );
        }

        devices.insert(
            definition.key.clone(),
            Arc::new(DeviceSlot {
                definition,
                connection: Mutex::new(ConnectionState::Unknown),
            }),
        );

        Ok(if previous.is_some() {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Created
        })
    }

    /// Remove a device and its whole subtree. Returns `false` if unknown.
    pub fn remove_device(&self, key: &DeviceKey) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let mut properties = self.properties.write().unwrap_or_else(PoisonError::into_inner);

        let Some(slot) = devices.remove(key) else {
            return false;
        };
        for (property_key, _) in slot.definition.properties() {
            if let Some(property) = properties.remove(&property_key) {
                property.lock().retired = true;
            }
        }
        true
    }

    fn property_slot(&self, key: &PropertyKey) -> Option<Arc<PropertySlot>> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn device_slot(&self, key: &DeviceKey) -> Option<Arc<DeviceSlot>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Current value of a property; `None` if unknown or not yet set.
    #[must_use]
    pub fn get(&self, key: &PropertyKey) -> Option<PropertyValue> {
        self.property_slot(key)?.lock().value.clone()
    }

    /// Definition of a property, if it exists.
    #[must_use]
    pub fn definition(&self, key: &PropertyKey) -> Option<PropertyDefinition> {
        self.property_slot(key).map(|slot| slot.definition.clone())
    }

    /// Consistent view of a single property.
    #[must_use]
    pub fn snapshot(&self, key: &PropertyKey) -> Option<PropertySnapshot> {
        let slot = self.property_slot(key)?;
        let state = slot.lock();
        Some(PropertySnapshot {
            key: key.clone(),
            definition: slot.definition.clone(),
            value: state.value.clone(),
            last_changed: state.last_changed,
        })
    }

    /// Wait for the emission turn of a property.
    ///
    /// Holding the guard across commit and publish keeps a property's
    /// outbound events in its own commit order, while other properties
    /// proceed. Returns `None` for unknown properties.
    pub async fn emission_turn(&self, key: &PropertyKey) -> Option<OwnedMutexGuard<()>> {
        let emission = Arc::clone(&self.property_slot(key)?.emission);
        Some(emission.lock_owned().await)
    }

    /// Validate and commit a value.
    ///
    /// The access mode is not checked here; that is the command processor's
    /// job. Every successful call returns a [`StateChange`], even when the
    /// value is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::UnknownProperty`] if the key is not known
    /// (or was removed concurrently) and [`ConnectorError::Validation`] if
    /// the value breaks the property's constraints. Nothing is mutated on
    /// error.
    pub fn apply(
        &self,
        key: &PropertyKey,
        value: &PropertyValue,
        origin: Origin,
        correlation_id: Option<CorrelationId>,
    ) -> Result<StateChange, ConnectorError> {
        let unknown = || UnknownPropertyError { key: key.clone() };
        let slot = self.property_slot(key).ok_or_else(unknown)?;

        let mut state = slot.lock();
        if state.retired {
            return Err(unknown().into());
        }
        let value = slot.definition.check_value(value)?;
        let timestamp = not_before(now(), state.last_changed);
        let previous = state.value.replace(value.clone());
        state.last_changed = Some(timestamp);
        drop(state);

        Ok(StateChange {
            key: key.clone(),
            previous,
            value,
            timestamp,
            origin,
            correlation_id,
        })
    }

    /// Snapshot a device tree with its connection state and values.
    #[must_use]
    pub fn describe(&self, key: &DeviceKey) -> Option<DeviceSnapshot> {
        let device = self.device_slot(key)?;
        let connection = *device.connection.lock().unwrap_or_else(PoisonError::into_inner);

        let channels = device
            .definition
            .channels
            .iter()
            .map(|channel| ChannelSnapshot {
                key: channel.key.clone(),
                category: channel.category,
                properties: channel
                    .properties
                    .iter()
                    .filter_map(|property| {
                        self.snapshot(&PropertyKey::from_parts(
                            key.clone(),
                            channel.key.clone(),
                            property.name.clone(),
                        ))
                    })
                    .collect(),
            })
            .collect();

        Some(DeviceSnapshot {
            key: key.clone(),
            name: device.definition.name.clone(),
            model: device.definition.model.clone(),
            connection,
            channels,
        })
    }

    /// Keys of every known device, in key order.
    #[must_use]
    pub fn device_keys(&self) -> Vec<DeviceKey> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Keys of every property that carries a generation rule, in key order.
    #[must_use]
    pub fn generated_properties(&self) -> Vec<PropertyKey> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| slot.definition.is_generated())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Current connection state of a device.
    #[must_use]
    pub fn connection_state(&self, key: &DeviceKey) -> Option<ConnectionState> {
        let slot = self.device_slot(key)?;
        let state = *slot.connection.lock().unwrap_or_else(PoisonError::into_inner);
        Some(state)
    }

    /// Set a device's connection state.
    ///
    /// Returns the transition, or `None` when the device is unknown or
    /// already in `state`.
    pub fn set_connection_state(
        &self,
        key: &DeviceKey,
        state: ConnectionState,
    ) -> Option<ConnectionChange> {
        let slot = self.device_slot(key)?;
        let mut current = slot.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == state {
            return None;
        }
        let previous = std::mem::replace(&mut *current, state);
        Some(ConnectionChange {
            device: key.clone(),
            previous,
            state,
            timestamp: now(),
        })
    }
}
