//! # Stormwire Common Library
//!
//! Shared code for the stormwire alert pipeline:
//! - Alert data model (VTEC, threat data, geography)
//! - Event types (AlertEvent enum) and the EventBus
//! - Timestamp parsing for NWS product formats
//! - Common error types

pub mod alert;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
