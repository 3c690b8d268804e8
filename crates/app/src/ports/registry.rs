//! Registry port — where device definitions come from.
//!
//! The registry owns the structural definitions of every virtual device. The
//! engine reads them at startup and whenever a change notification arrives,
//! and never writes structure back, only values.

use std::future::Future;
use std::time::Duration;

use vconnector_domain::device::DeviceDefinition;
use vconnector_domain::error::ConnectorError;
use vconnector_domain::key::DeviceKey;

/// Per-connector settings sourced from the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorSettings {
    /// Scheduler tick interval; the daemon default applies when unset.
    pub tick_interval: Option<Duration>,
}

/// A structural change reported by the registry after startup.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    /// A device was created or its definition replaced.
    DeviceUpserted(DeviceDefinition),
    /// A device and its whole subtree were deleted.
    DeviceRemoved(DeviceKey),
}

/// Read interface of the registry collaborator.
pub trait Registry: Send + Sync {
    /// List every virtual device with its channels and properties.
    fn list_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceDefinition>, ConnectorError>> + Send;

    /// Connector-level settings. Defaults to none.
    fn connector_settings(
        &self,
    ) -> impl Future<Output = Result<ConnectorSettings, ConnectorError>> + Send {
        async { Ok(ConnectorSettings::default()) }
    }
}

/// A fixed, in-memory registry.
///
/// Used by tests and by embedders that build definitions in code.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    devices: Vec<DeviceDefinition>,
    settings: ConnectorSettings,
}

impl StaticRegistry {
    /// Create a registry serving the given devices.
    #[must_use]
    pub fn new(devices: Vec<DeviceDefinition>) -> Self {
        Self {
            devices,
            settings: ConnectorSettings::default(),
        }
    }

    /// Serve a tick interval alongside the devices.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.settings.tick_interval = Some(interval);
        self
    }
}

impl Registry for StaticRegistry {
    async fn list_devices(&self) -> Result<Vec<DeviceDefinition>, ConnectorError> {
        Ok(self.devices.clone())
    }

    async fn connector_settings(&self) -> Result<ConnectorSettings, ConnectorError> {
        Ok(self.settings.clone())
    }
}
