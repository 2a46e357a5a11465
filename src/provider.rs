//! Provider abstraction for the compute and block-storage control plane.
//!
//! The resize workflow only ever observes provider resources through these
//! handles. Status values are snapshots taken at a single poll and must not be
//! treated as authoritative beyond that observation.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Handle for a compute instance resolved through a provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider specific identifier for the instance.
    pub id: String,
    /// Region or availability zone hosting the instance.
    pub region: String,
    /// Status observed when the handle was resolved.
    pub status: InstanceStatus,
    /// Public address used for the login channel, when one is assigned.
    pub public_address: Option<IpAddr>,
    /// Root volume size in bytes observed at lookup, when the provider
    /// reports it alongside the instance.
    pub root_volume_size: Option<u64>,
}

/// Handle for a block-storage volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Provider specific identifier for the volume.
    pub id: String,
    /// Region or availability zone hosting the volume.
    pub region: String,
    /// Capacity in bytes.
    pub size_bytes: u64,
    /// Device slot the volume occupies on its instance (`"0"` for the
    /// Scaleway boot slot).
    pub device: String,
}

/// Observable instance power state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// The instance is powered on.
    Running,
    /// The instance is powered off.
    Stopped,
    /// The instance is between states; carries the provider's label.
    Transitioning(String),
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => formatter.write_str("running"),
            Self::Stopped => formatter.write_str("stopped"),
            Self::Transitioning(state) => write!(formatter, "transitioning ({state})"),
        }
    }
}

/// Observable volume state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum VolumeStatus {
    /// The volume exists and is not attached to any instance.
    Available,
    /// The volume is attached to the given instance.
    InUse {
        /// Identifier of the instance holding the volume.
        instance_id: String,
    },
    /// The volume is busy (creating, snapshotting, deleting, ...).
    Transitioning(String),
    /// The provider reports the volume as failed.
    Error(String),
}

impl VolumeStatus {
    /// Returns `true` when the volume is attached to `instance_id`.
    #[must_use]
    pub fn is_attached_to(&self, instance_id: &str) -> bool {
        matches!(self, Self::InUse { instance_id: holder } if holder == instance_id)
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => formatter.write_str("available"),
            Self::InUse { instance_id } => write!(formatter, "in-use by {instance_id}"),
            Self::Transitioning(state) => write!(formatter, "transitioning ({state})"),
            Self::Error(state) => write!(formatter, "error ({state})"),
        }
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Control-plane operations required to resize a root volume.
///
/// Lookups return `Ok(None)` when the resource does not exist so callers can
/// distinguish a missing resource from a rejected API call.
pub trait CloudComputeProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves an instance by identifier within a region.
    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a str,
    ) -> ProviderFuture<'a, Option<Instance>, Self::Error>;

    /// Requests a power-off of the instance.
    fn stop_instance<'a>(&'a self, instance: &'a Instance) -> ProviderFuture<'a, (), Self::Error>;

    /// Requests a power-on of the instance.
    fn start_instance<'a>(&'a self, instance: &'a Instance)
    -> ProviderFuture<'a, (), Self::Error>;

    /// Observes the current instance status.
    fn instance_status<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error>;

    /// Resolves the volume currently attached in the instance's boot slot.
    fn root_volume<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, Option<Volume>, Self::Error>;

    /// Detaches `volume` from `instance`.
    fn detach_volume<'a>(
        &'a self,
        volume: &'a Volume,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Creates a copy of a detached `volume` with a capacity of `size_bytes`.
    fn clone_volume<'a>(
        &'a self,
        volume: &'a Volume,
        size_bytes: u64,
    ) -> ProviderFuture<'a, Volume, Self::Error>;

    /// Attaches `volume` to `instance` in the given device slot.
    fn attach_volume<'a>(
        &'a self,
        volume: &'a Volume,
        instance: &'a Instance,
        device: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Observes the current volume status.
    fn volume_status<'a>(
        &'a self,
        volume: &'a Volume,
    ) -> ProviderFuture<'a, VolumeStatus, Self::Error>;

    /// Deletes a detached volume.
    fn delete_volume<'a>(&'a self, volume: &'a Volume) -> ProviderFuture<'a, (), Self::Error>;
}
