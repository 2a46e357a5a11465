//! Scaleway implementation of [`CloudComputeProvider`].
//!
//! Server queries and power actions go through `scaleway-rs`; the volume,
//! snapshot, and attachment endpoints the SDK does not cover are called
//! directly over HTTP.

mod api;
mod error;
mod instance;
mod types;
mod volume;

use std::time::Duration;

use scaleway_rs::ScalewayApi;

use crate::config::ScalewayConfig;
use crate::provider::{
    CloudComputeProvider, Instance, InstanceStatus, ProviderFuture, Volume, VolumeStatus,
};

pub use error::ScalewayProviderError;

/// Volume map slot holding the boot volume.
pub const ROOT_SLOT: &str = "0";
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(900);

/// Provider that drives the Scaleway Instances API.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
    config: ScalewayConfig,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl ScalewayProvider {
    /// Constructs a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when the provided
    /// configuration fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayProviderError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        })
    }

    /// Overrides the interval and deadline used while waiting for the
    /// intermediate snapshot of a clone.
    #[must_use]
    pub const fn with_snapshot_wait(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.wait_timeout = timeout;
        self
    }

    /// Returns the configuration the provider was built with.
    #[must_use]
    pub const fn config(&self) -> &ScalewayConfig {
        &self.config
    }
}

impl CloudComputeProvider for ScalewayProvider {
    type Error = ScalewayProviderError;

    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a str,
    ) -> ProviderFuture<'a, Option<Instance>, Self::Error> {
        Box::pin(async move { self.resolve_instance(instance_id, region).await })
    }

    fn stop_instance<'a>(&'a self, instance: &'a Instance) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.power_action(instance, "poweroff").await })
    }

    fn start_instance<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.power_action(instance, "poweron").await })
    }

    fn instance_status<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move { self.current_status(instance).await })
    }

    fn root_volume<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, Option<Volume>, Self::Error> {
        Box::pin(async move { self.resolve_root_volume(instance).await })
    }

    fn detach_volume<'a>(
        &'a self,
        volume: &'a Volume,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.detach(volume, instance).await })
    }

    fn clone_volume<'a>(
        &'a self,
        volume: &'a Volume,
        size_bytes: u64,
    ) -> ProviderFuture<'a, Volume, Self::Error> {
        Box::pin(async move { self.clone_with_size(volume, size_bytes).await })
    }

    fn attach_volume<'a>(
        &'a self,
        volume: &'a Volume,
        instance: &'a Instance,
        device: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.attach(volume, instance, device).await })
    }

    fn volume_status<'a>(
        &'a self,
        volume: &'a Volume,
    ) -> ProviderFuture<'a, VolumeStatus, Self::Error> {
        Box::pin(async move { self.observe_volume(volume).await })
    }

    fn delete_volume<'a>(&'a self, volume: &'a Volume) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.delete(volume).await })
    }
}
