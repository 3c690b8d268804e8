//! Virtual connector — lifecycle of the engine.
//!
//! `start` loads every device from the [`Registry`], marks them connected,
//! starts the [`Scheduler`] and begins serving inbound messages. `stop`
//! drains both and marks every device disconnected. Registry change
//! notifications are applied in between.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use vconnector_domain::device::{ConnectionState, DeviceDefinition};
use vconnector_domain::error::{ConnectorError, LifecycleError};
use vconnector_domain::key::DeviceKey;

use crate::generator::ValueGenerator;
use crate::messages::Acknowledgement;
use crate::ports::{EventPublisher, Registry, RegistryChange};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerState};
use crate::services::command_processor::CommandProcessor;
use crate::services::event_bridge::EventBridge;
use crate::store::{DeviceSnapshot, DeviceStateStore};

/// Engine settings owned by the host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub scheduler: SchedulerConfig,
    /// Inbound messages handled concurrently.
    pub max_in_flight_commands: usize,
    /// Seed for the value generator; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            max_in_flight_commands: 32,
            seed: None,
        }
    }
}

struct InboundLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The virtual device connector.
pub struct VirtualConnector<R, P> {
    registry: R,
    store: Arc<DeviceStateStore>,
    bridge: Arc<EventBridge<P>>,
    generator: Arc<ValueGenerator>,
    config: ConnectorConfig,
    scheduler: Mutex<Option<Arc<Scheduler<P>>>>,
    inbound: Mutex<Option<InboundLoop>>,
}

impl<R, P> VirtualConnector<R, P>
where
    R: Registry,
    P: EventPublisher + 'static,
{
    pub fn new(registry: R, publisher: P, config: ConnectorConfig) -> Self {
        let store = Arc::new(DeviceStateStore::new());
        let processor = Arc::new(CommandProcessor::new(Arc::clone(&store)));
        let generator = match config.seed {
            Some(seed) => ValueGenerator::seeded(seed),
            None => ValueGenerator::new(),
        };
        Self {
            registry,
            store,
            bridge: Arc::new(EventBridge::new(processor, publisher)),
            generator: Arc::new(generator),
            config,
            scheduler: Mutex::new(None),
            inbound: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<DeviceStateStore> {
        &self.store
    }

    /// Snapshot of a device tree.
    #[must_use]
    pub fn describe(&self, key: &DeviceKey) -> Option<DeviceSnapshot> {
        self.store.describe(key)
    }

    /// Current scheduler state; idle until started.
    #[must_use]
    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(SchedulerState::Idle, |s| s.state())
    }

    fn is_running(&self) -> bool {
        self.scheduler_state() == SchedulerState::Running
    }

    /// Handle one inbound message directly, bypassing the inbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Protocol`] for undecodable messages.
    pub async fn handle_inbound(&self, raw: &str) -> Result<Acknowledgement, ConnectorError> {
        Ok(self.bridge.on_inbound_command(raw).await?)
    }

    /// Load the registry and start the scheduler and the inbound loop.
    ///
    /// Devices with invalid definitions are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns the registry's error when it cannot be read, which leaves the
    /// connector idle, and [`LifecycleError::AlreadyStarted`] on a second call.
    pub async fn start(&self, inbound: mpsc::Receiver<String>) -> Result<(), ConnectorError> {
        if self.scheduler_state() != SchedulerState::Idle {
            return Err(LifecycleError::AlreadyStarted.into());
        }

        let devices = self.registry.list_devices().await.inspect_err(|err| {
            tracing::error!(error = ?err, "registry unavailable");
        })?;
        let settings = self.registry.connector_settings().await?;

        for device in devices {
            self.load_device(device);
        }

        let mut scheduler_config = self.config.scheduler.clone();
        if let Some(interval) = settings.tick_interval {
            scheduler_config.interval = interval;
        }
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&self.bridge),
            Arc::clone(&self.generator),
            scheduler_config,
        ));
        scheduler.start()?;
        *self.scheduler.lock().unwrap_or_else(PoisonError::into_inner) = Some(scheduler);

        for device in self.store.device_keys() {
            self.set_connection(&device, ConnectionState::Connected).await;
        }

        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.bridge).run_inbound(
            inbound,
            self.config.max_in_flight_commands,
            stopped,
        ));
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(InboundLoop { stop, handle });

        tracing::info!(devices = self.store.device_keys().len(), "connector started");
        Ok(())
    }

    /// Stop the scheduler (finishing its in-flight tick), drain inbound
    /// handlers and mark every device disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] unless the connector is running.
    pub async fn stop(&self) -> Result<(), ConnectorError> {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(LifecycleError::NotRunning)?;
        scheduler.stop().await?;

        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(InboundLoop { stop, handle }) = inbound {
            let _ = stop.send(true);
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "inbound loop failed");
            }
        }

        for device in self.store.device_keys() {
            self.set_connection(&device, ConnectionState::Disconnected).await;
        }

        tracing::info!("connector stopped");
        Ok(())
    }

    /// Apply a structural change reported by the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Validation`] when an upserted definition is
    /// invalid; the previous definition stays in force.
    pub async fn apply_registry_change(&self, change: RegistryChange) -> Result<(), ConnectorError> {
        match change {
            RegistryChange::DeviceUpserted(definition) => {
                let key = definition.key.clone();
                let outcome = self.store.upsert_device(definition).inspect_err(|err| {
                    tracing::warn!(device = %key, error = %err, "rejected device definition");
                })?;
                tracing::info!(device = %key, ?outcome, "device definition applied");
                if self.is_running() {
                    self.set_connection(&key, ConnectionState::Connected).await;
                }
            }
            RegistryChange::DeviceRemoved(key) => {
                if self.is_running() {
                    self.set_connection(&key, ConnectionState::Disconnected).await;
                }
                if self.store.remove_device(&key) {
                    tracing::info!(device = %key, "device removed");
                }
            }
        }
        Ok(())
    }

    /// Apply registry changes until the channel closes.
    pub async fn follow_registry(&self, mut changes: mpsc::Receiver<RegistryChange>) {
        while let Some(change) = changes.recv().await {
            // Rejections are already logged; the previous definition stays.
            let _ = self.apply_registry_change(change).await;
        }
    }

    fn load_device(&self, definition: DeviceDefinition) {
        let key = definition.key.clone();
        match self.store.upsert_device(definition) {
            Ok(_) => tracing::debug!(device = %key, "device loaded"),
            Err(err) => tracing::warn!(device = %key, error = %err, "skipping invalid device"),
        }
    }

    async fn set_connection(&self, device: &DeviceKey, state: ConnectionState) {
        if let Some(change) = self.store.set_connection_state(device, state) {
            self.bridge.publish_connection_change(&change).await;
        }
    }
}
