//! Error types for the silbus core
//!
//! API misuse surfaces as typed errors; receive-path protocol violations are
//! never errors — they are logged and the offending frame is dropped or
//! reported with a protocol-level status code.

use thiserror::Error;

use crate::extension::ExtensionError;
use crate::replay::ReplayDataError;

/// Errors surfaced by the public core API
#[derive(Debug, Error)]
pub enum CoreError {
    /// An API was called in the wrong lifecycle state
    #[error("state error: {0}")]
    State(String),

    /// A configuration update violates an invariant
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Extension library could not be located, verified or instantiated
    #[error("extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// A trace file is malformed or could not be opened
    #[error("replay data error: {0}")]
    Replay(#[from] ReplayDataError),
}

/// Result type for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;
