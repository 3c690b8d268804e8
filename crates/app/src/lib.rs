//! # vconnector-app
//!
//! Application layer — the virtual device engine and its **port definitions**.
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `Registry` — read-only source of device/channel/property definitions
//!   - `EventPublisher` — outbound side of the platform message bus
//! - Own the **device state store**, the only mutable shared resource
//! - Validate and apply writes through the **command processor**
//! - Produce simulated values with the **value generator** and drive it from
//!   the periodic **scheduler** (plus the thermostat controller)
//! - Translate wire messages in the **event bridge**
//! - Provide **in-process infrastructure** (event bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `vconnector-domain` only (plus `tokio` for channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod connector;
pub mod event_bus;
pub mod generator;
pub mod messages;
pub mod ports;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod thermostat;
