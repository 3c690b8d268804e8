//! # vconnector-domain
//!
//! Pure domain model for the virtual device connector.
//!
//! ## Responsibilities
//! - Foundational types: typed keys and identifiers, error conventions, timestamps
//! - Define **Devices**, **Channels** and **Properties** (the ownership tree the
//!   registry hands us)
//! - Define **Property values** and the checks that keep them inside their
//!   declared data type, range and enum set
//! - Define **Generation rules** (toggle, increment, random, pattern)
//! - Define **Commands** (write requests) and **State changes** (committed
//!   transitions, tagged with their origin)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod key;
pub mod time;

pub mod command;
pub mod device;
pub mod generation;
pub mod property;
pub mod state_change;
pub mod value;
