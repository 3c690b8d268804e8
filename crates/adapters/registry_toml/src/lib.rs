//! # vconnector-adapter-registry-toml
//!
//! Registry collaborator backed by a TOML definitions file.
//!
//! ## How it works
//!
//! [`TomlRegistry`] reads the whole file on every `list_devices` call and
//! remembers the devices it served. [`TomlRegistry::watch`] polls the file in
//! the background, diffs the device set against what was last served and
//! sends the differences as [`RegistryChange`]s. A file that fails to read or
//! parse while watching is logged and skipped, so the last good definitions
//! stay in force.
//!
//! Device entries that fail validation are logged and left out; they do not
//! invalidate the rest of the file. While watching, a device that was served
//! before keeps its last good definition until its entry validates again.
//!
//! ## Dependency rule
//!
//! Same as other adapters: depends on `vconnector-app` and `vconnector-domain`.

mod error;
mod schema;

pub use error::RegistryFileError;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vconnector_app::ports::{ConnectorSettings, Registry, RegistryChange};
use vconnector_domain::device::DeviceDefinition;
use vconnector_domain::error::ConnectorError;
use vconnector_domain::key::DeviceKey;

use schema::RegistryFile;

/// Everything the definitions file declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Definitions {
    pub settings: ConnectorSettings,
    pub devices: Vec<DeviceDefinition>,
    /// Keys of device entries that failed validation.
    pub rejected: Vec<DeviceKey>,
}

/// Registry reading device definitions from a TOML file.
#[derive(Debug, Clone)]
pub struct TomlRegistry {
    path: PathBuf,
    served: Arc<Mutex<BTreeMap<DeviceKey, DeviceDefinition>>>,
}

impl TomlRegistry {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            served: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and convert the definitions file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryFileError`] if the file cannot be read or parsed.
    pub async fn load(&self) -> Result<Definitions, RegistryFileError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RegistryFileError::Read {
                path: self.path.clone(),
                source,
            })?;
        let file: RegistryFile = toml::from_str(&raw).map_err(|source| RegistryFileError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let mut devices: Vec<DeviceDefinition> = Vec::with_capacity(file.devices.len());
        let mut rejected = Vec::new();
        for entry in file.devices {
            let key = entry.key.clone();
            match entry.into_definition() {
                Ok(device) if devices.iter().any(|d| d.key == device.key) => {
                    tracing::warn!(device = %key, "duplicate device entry ignored");
                }
                Ok(device) => devices.push(device),
                Err(err) => {
                    tracing::warn!(device = %key, error = %err, "invalid device entry ignored");
                    rejected.extend(DeviceKey::new(key).ok());
                }
            }
        }

        Ok(Definitions {
            settings: file.connector.settings(),
            devices,
            rejected,
        })
    }

    /// Poll the file every `interval` and send device changes on `changes`.
    ///
    /// The task ends when the receiving side of `changes` is dropped.
    pub fn watch(&self, interval: Duration, changes: mpsc::Sender<RegistryChange>) -> JoinHandle<()> {
        tracing::info!(path = %self.path.display(), ?interval, "watching registry file");
        tokio::spawn(self.clone().run_watch(interval, changes))
    }

    async fn run_watch(self, interval: Duration, changes: mpsc::Sender<RegistryChange>) {
        loop {
            tokio::select! {
                () = changes.closed() => return,
                () = tokio::time::sleep(interval) => {}
            }

            let definitions = match self.load().await {
                Ok(definitions) => definitions,
                Err(err) => {
                    tracing::warn!(error = ?err, "registry reload failed, keeping last definitions");
                    continue;
                }
            };

            for change in self.remember(definitions.devices, &definitions.rejected) {
                if changes.send(change).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Record `devices` as served and return what changed since last time.
    ///
    /// Served devices listed in `rejected` keep their previous definition.
    fn remember(
        &self,
        devices: Vec<DeviceDefinition>,
        rejected: &[DeviceKey],
    ) -> Vec<RegistryChange> {
        let mut served = self.served.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next: BTreeMap<DeviceKey, DeviceDefinition> =
            devices.into_iter().map(|d| (d.key.clone(), d)).collect();
        for key in rejected {
            if let Some(previous) = served.get(key) {
                next.entry(key.clone()).or_insert_with(|| previous.clone());
            }
        }

        let mut changes: Vec<RegistryChange> = served
            .keys()
            .filter(|key| !next.contains_key(*key))
            .cloned()
            .map(RegistryChange::DeviceRemoved)
            .collect();
        changes.extend(
            next.values()
                .filter(|device| served.get(&device.key) != Some(*device))
                .cloned()
                .map(RegistryChange::DeviceUpserted),
        );

        *served = next;
        changes
    }
}

impl Registry for TomlRegistry {
    async fn list_devices(&self) -> Result<Vec<DeviceDefinition>, ConnectorError> {
        let definitions = self.load().await?;
        self.remember(definitions.devices.clone(), &definitions.rejected);
        Ok(definitions.devices)
    }

    async fn connector_settings(&self) -> Result<ConnectorSettings, ConnectorError> {
        Ok(self.load().await?.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HALL: &str = r#"
        [connector]
        tick_interval_ms = 1500

        [[devices]]
        key = "hall"
        name = "Hall"

        [[devices.channels]]
        key = "sensors"
        category = "sensor"

        [[devices.channels.properties]]
        name = "temperature"
        data_type = "float"
        min = 0.0
        max = 100.0
        generation = { type = "random" }
    "#;

    const KITCHEN: &str = r#"
        [[devices]]
        key = "kitchen"
        name = "Kitchen"

        [[devices.channels]]
        key = "relay"
        category = "switch"

        [[devices.channels.properties]]
        name = "on"
        data_type = "bool"
        initial = false
    "#;

    fn write(file: &tempfile::NamedTempFile, contents: &str) {
        let mut handle = std::fs::File::create(file.path()).unwrap();
        handle.write_all(contents.as_bytes()).unwrap();
        handle.sync_all().unwrap();
    }

    fn registry_file(contents: &str) -> (tempfile::NamedTempFile, TomlRegistry) {
        let file = tempfile::NamedTempFile::new().unwrap();
        write(&file, contents);
        let registry = TomlRegistry::new(file.path());
        (file, registry)
    }

    #[tokio::test]
    async fn should_list_devices_and_settings_from_file() {
        let (_file, registry) = registry_file(HALL);

        let devices = registry.list_devices().await.unwrap();
        let settings = registry.connector_settings().await.unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].key.as_str(), "hall");
        assert_eq!(settings.tick_interval, Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn should_fail_with_registry_error_when_file_missing() {
        let registry = TomlRegistry::new("/nonexistent/devices.toml");
        let result = registry.list_devices().await;
        assert!(matches!(result, Err(ConnectorError::Registry(_))));
    }

    #[tokio::test]
    async fn should_fail_with_parse_error_on_invalid_toml() {
        let (_file, registry) = registry_file("[[devices]\nkey =");
        let result = registry.load().await;
        assert!(matches!(result, Err(RegistryFileError::Parse { .. })));
    }

    #[tokio::test]
    async fn should_skip_invalid_and_duplicate_devices() {
        let contents = format!(
            "{HALL}\n{KITCHEN}\n{}",
            r#"
            [[devices]]
            key = "hall"
            name = "Second hall"

            [[devices]]
            key = "  "
            name = "Blank"
            "#
        );
        let (_file, registry) = registry_file(&contents);

        let devices = registry.load().await.unwrap().devices;

        let keys: Vec<_> = devices.iter().map(|d| d.key.as_str().to_string()).collect();
        assert_eq!(keys, vec!["hall", "kitchen"]);
        assert_eq!(devices[0].name, "Hall");
    }

    #[test]
    fn should_diff_against_served_devices() {
        let registry = TomlRegistry::new("unused.toml");
        let hall = toml::from_str::<RegistryFile>(HALL).unwrap().devices;
        let hall: Vec<_> = hall.into_iter().map(|d| d.into_definition().unwrap()).collect();
        let kitchen = toml::from_str::<RegistryFile>(KITCHEN).unwrap().devices;
        let kitchen: Vec<_> = kitchen.into_iter().map(|d| d.into_definition().unwrap()).collect();

        assert_eq!(registry.remember(hall.clone(), &[]).len(), 1);
        assert!(registry.remember(hall.clone(), &[]).is_empty());

        let changes = registry.remember(kitchen.clone(), &[]);
        assert_eq!(
            changes,
            vec![
                RegistryChange::DeviceRemoved(hall[0].key.clone()),
                RegistryChange::DeviceUpserted(kitchen[0].clone()),
            ]
        );
    }

    #[tokio::test]
    async fn should_keep_last_definition_when_entry_becomes_invalid() {
        let (file, registry) = registry_file(HALL);
        let served = registry.list_devices().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let watcher = registry.watch(Duration::from_millis(20), tx);

        let broken = HALL.replace("min = 0.0", "min = 20.0").replace("max = 100.0", "max = 10.0");
        write(&file, &format!("{broken}\n{KITCHEN}"));

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(change, RegistryChange::DeviceUpserted(ref d) if d.key.as_str() == "kitchen"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        let kept = registry.served.lock().unwrap().get(&served[0].key).cloned();
        assert_eq!(kept.as_ref(), Some(&served[0]));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn should_report_rejected_device_keys() {
        let broken = HALL.replace("max = 100.0", "max = -1.0");
        let (_file, registry) = registry_file(&format!("{broken}\n{KITCHEN}"));

        let definitions = registry.load().await.unwrap();

        assert_eq!(definitions.devices.len(), 1);
        assert_eq!(definitions.devices[0].key.as_str(), "kitchen");
        assert_eq!(definitions.rejected, vec![DeviceKey::new("hall").unwrap()]);
    }

    #[tokio::test]
    async fn should_report_file_changes_while_watching() {
        let (file, registry) = registry_file(HALL);
        registry.list_devices().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let watcher = registry.watch(Duration::from_millis(20), tx);

        write(&file, "this is not toml [");
        tokio::time::sleep(Duration::from_millis(100)).await;
        write(&file, KITCHEN);

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(first, RegistryChange::DeviceRemoved(ref key) if key.as_str() == "hall"));
        assert!(matches!(second, RegistryChange::DeviceUpserted(ref d) if d.key.as_str() == "kitchen"));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
    }
}
