//! Error types for the Scaleway provider.

use crate::config::ConfigError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

/// Errors raised by the Scaleway provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayProviderError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK or HTTP layer.
        message: String,
    },
    /// Raised when a volume cannot be attached to an instance.
    #[error("failed to attach volume {volume_id} to instance {instance_id}: {message}")]
    VolumeAttachmentFailed {
        /// Volume identifier that could not be attached.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when a volume cannot be detached from an instance.
    #[error("failed to detach volume {volume_id} from instance {instance_id}: {message}")]
    VolumeDetachFailed {
        /// Volume identifier that could not be detached.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when a volume cannot be created.
    #[error("failed to create volume {name} in zone {zone}: {message}")]
    VolumeCreateFailed {
        /// Volume name requested.
        name: String,
        /// Zone where creation was attempted.
        zone: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when the intermediate snapshot of a clone fails.
    #[error("failed to snapshot volume {volume_id}: {message}")]
    SnapshotFailed {
        /// Volume being snapshotted.
        volume_id: String,
        /// Error message or terminal state from the provider.
        message: String,
    },
    /// Raised when an asynchronous provider operation exceeds the timeout.
    #[error("timeout waiting for {action} on {resource_id}")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Provider resource identifier.
        resource_id: String,
    },
    /// Raised when an instance disappears while it is being operated on.
    #[error("instance {instance_id} not found in zone {zone}")]
    InstanceNotFound {
        /// Instance identifier that was not found.
        instance_id: String,
        /// Zone where lookup was attempted.
        zone: String,
    },
    /// Raised when the specified volume does not exist or is not accessible.
    #[error("volume {volume_id} not found in zone {zone}")]
    VolumeNotFound {
        /// Volume identifier that was not found.
        volume_id: String,
        /// Zone where lookup was attempted.
        zone: String,
    },
}

impl From<ScalewayError> for ScalewayProviderError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayProviderError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<reqwest::Error> for ScalewayProviderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}
