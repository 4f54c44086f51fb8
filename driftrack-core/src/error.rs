//! Error types for driftrack-core.

use thiserror::Error;

/// Result type alias for driftrack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for driftrack operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No wire geometry is known for the requested wire.
    #[error("unknown wire: layer {layer}, wire {wire}")]
    UnknownWire {
        /// Continuous layer id.
        layer: u16,
        /// Wire number inside the layer.
        wire: u16,
    },

    /// The calibration has no drift measurement for a raw hit.
    #[error("missing drift calibration for raw hit {0}")]
    MissingDrift(usize),

    /// A hit identifier does not belong to the registry.
    #[error("unknown hit id {0}")]
    UnknownHit(usize),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
