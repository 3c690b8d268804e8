//! Use-case services — command processing and the platform event bridge.

pub mod command_processor;
pub mod event_bridge;
