//! # vconnectord — virtual device connector daemon
//!
//! Composition root that wires the registry, the engine and the message
//! transport together and runs until interrupted.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Initialize structured logging on stderr
//! - Construct the TOML registry and the in-process event bus (adapters)
//! - Construct the virtual connector, injecting both via port traits
//! - Carry platform messages as JSON lines: commands on stdin, events on stdout
//! - Follow registry file changes
//! - Handle graceful shutdown (SIGINT or end of input)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;
mod stdio;

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use vconnector_adapter_registry_toml::TomlRegistry;
use vconnector_app::connector::VirtualConnector;
use vconnector_app::event_bus::InProcessEventBus;

use config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration
    let config = Config::load()?;

    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .with_writer(std::io::stderr)
        .init();

    // Adapters
    let registry = TomlRegistry::new(&config.registry.path);
    let event_bus = InProcessEventBus::new(config.connector.event_bus_capacity);
    let writer = tokio::spawn(stdio::write_lines(tokio::io::stdout(), event_bus.subscribe()));

    // Engine
    let connector = Arc::new(VirtualConnector::new(
        registry.clone(),
        event_bus,
        config.connector_config(),
    ));

    let (inbound_tx, inbound_rx) = mpsc::channel(config.connector.max_in_flight_commands);
    connector.start(inbound_rx).await?;

    // Registry changes
    let (changes_tx, changes_rx) = mpsc::channel(64);
    let watcher = config
        .watch_interval()
        .map(|interval| registry.watch(interval, changes_tx));
    let follower = tokio::spawn({
        let connector = Arc::clone(&connector);
        async move { connector.follow_registry(changes_rx).await }
    });

    // Inbound commands
    let mut reader = tokio::spawn(stdio::read_lines(
        BufReader::new(tokio::io::stdin()),
        inbound_tx,
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(err) => tracing::error!(error = %err, "failed to listen for interrupt"),
        },
        _ = &mut reader => tracing::info!("input closed, shutting down"),
    }

    // Shutdown
    connector.stop().await?;
    reader.abort();
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    follower.abort();
    let _ = follower.await;

    // The last publisher handle goes away with the connector, which closes
    // the bus and lets the writer flush what is left.
    drop(connector);
    writer.await?;

    Ok(())
}
