//! # Laser Harp Common Library
//!
//! Shared code for the laser harp controller:
//! - Configuration model, loading and validation
//! - Error taxonomy
//! - Event types and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use config::{Channel, HarpConfig, Level, NoteConfig};
pub use error::{Error, Result};
pub use events::{EventBus, HarpEvent};
