//! Errors reported by the device layer.
//!
//! Everything the controller or the `Block` type can fail with is collected
//! in [`ApiError`]. The engine crate wraps this type in its own error enum
//! with a `#[from]` conversion, so `?` flows device failures upward
//! unchanged.

use std::io;
use thiserror::Error;

/// Error type of the device layer.
#[derive(Error, Debug)]
pub enum ApiError {
    /// IO failure while creating, mapping or flushing the backing image.
    #[error("io failure in the device layer")]
    Io(#[from] io::Error),
    /// (De)serialization failure inside a block.
    #[error("serialization failure in the device layer")]
    Serialize(#[from] bincode::Error),
    /// Invalid input to the controller (bad geometry, out-of-range block).
    #[error("invalid controller input: {0}")]
    ControllerInput(&'static str),
    /// Invalid input to a block operation (out-of-bounds read or write).
    #[error("invalid block input: {0}")]
    BlockInput(&'static str),
    /// Escape hatch for callers that do not care about the concrete kind.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shorthand for results produced by the device layer.
pub type Result<T> = std::result::Result<T, ApiError>;
