//! Common error types for the laser harp

use crate::config::Channel;
use std::time::Duration;
use thiserror::Error;

/// Common result type for laser harp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the controller and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or ambiguous configuration, or use of an unconfigured channel.
    ///
    /// Fatal at startup; never recovered.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure on configure/read/write of a digital channel
    #[error("Hardware error on {channel}: {message}")]
    Hardware { channel: Channel, message: String },

    /// Tone worker did not stop within the grace period
    #[error("Tone worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a hardware failure on `channel`
    pub fn hardware(channel: Channel, message: impl Into<String>) -> Self {
        Error::Hardware {
            channel,
            message: message.into(),
        }
    }

    /// True for errors that abort a single scan cycle but may clear on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Hardware { .. })
    }
}
