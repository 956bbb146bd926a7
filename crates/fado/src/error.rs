//! Error types shared by the fade engine and the device platforms.

use std::path::PathBuf;

/// Failures a single light can run into while being faded or reconciled.
///
/// These never cross the request boundary as a crash: the engine logs them
/// and carries on with the remaining lights.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The platform has no snapshot for this light.
    #[error("light not found: {0}")]
    DeviceNotFound(String),

    /// A command asked for a dimension the light cannot do.
    #[error("light {light_id} does not support {capability}")]
    UnsupportedCapability {
        light_id: String,
        capability: String,
    },

    /// Issuing a command to the light failed.
    #[error("light {light_id} is unavailable: {reason}")]
    DeviceUnavailable { light_id: String, reason: String },

    /// Persisting brightness memory failed. In-memory state stays authoritative.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to access {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to (de)serialize brightness memory: {0}")]
    Serialization(#[from] serde_json::Error),
}
