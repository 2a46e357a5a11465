//! Server queries and power actions through `scaleway-rs`.

use std::net::IpAddr;
use std::str::FromStr;

use tracing::debug;

use crate::provider::{Instance, InstanceStatus, Volume};

use super::types::InstanceState;
use super::{ROOT_SLOT, ScalewayProvider, ScalewayProviderError};

/// Server fields the resize workflow needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct InstanceSnapshot {
    pub id: String,
    pub state: InstanceState,
    pub public_ip: Option<String>,
}

impl ScalewayProvider {
    pub(super) async fn fetch_instance(
        &self,
        zone: &str,
        instance_id: &str,
    ) -> Result<Option<InstanceSnapshot>, ScalewayProviderError> {
        let mut servers = self
            .api
            .list_instances(zone)
            .servers(instance_id)
            .per_page(1)
            .run_async()
            .await?;

        Ok(servers
            .pop()
            .filter(|server| server.id == instance_id)
            .map(|server| InstanceSnapshot {
                id: server.id,
                state: server.state.into(),
                public_ip: server.public_ip.map(|ip| ip.address),
            }))
    }

    /// Returns the volume map of a server as `(slot, volume id)` pairs.
    pub(super) async fn attached_volumes(
        &self,
        zone: &str,
        instance_id: &str,
    ) -> Result<Vec<(String, String)>, ScalewayProviderError> {
        let server = self.api.get_instance_async(zone, instance_id).await?;
        Ok(server
            .volumes
            .volumes
            .iter()
            .map(|(slot, volume)| (slot.clone(), volume.id.clone()))
            .collect())
    }

    pub(super) async fn resolve_instance(
        &self,
        instance_id: &str,
        zone: &str,
    ) -> Result<Option<Instance>, ScalewayProviderError> {
        let Some(snapshot) = self.fetch_instance(zone, instance_id).await? else {
            return Ok(None);
        };

        let root_volume_size = match self.root_volume_id(zone, instance_id).await? {
            Some(volume_id) => self
                .fetch_volume(zone, &volume_id)
                .await?
                .map(|volume| volume.size),
            None => None,
        };

        Ok(Some(Instance {
            id: snapshot.id,
            region: zone.to_owned(),
            status: snapshot.state.to_status(),
            public_address: snapshot
                .public_ip
                .as_deref()
                .and_then(|ip| IpAddr::from_str(ip).ok()),
            root_volume_size,
        }))
    }

    pub(super) async fn current_status(
        &self,
        instance: &Instance,
    ) -> Result<InstanceStatus, ScalewayProviderError> {
        self.fetch_instance(&instance.region, &instance.id)
            .await?
            .map(|snapshot| snapshot.state.to_status())
            .ok_or_else(|| ScalewayProviderError::InstanceNotFound {
                instance_id: instance.id.clone(),
                zone: instance.region.clone(),
            })
    }

    pub(super) async fn power_action(
        &self,
        instance: &Instance,
        action: &str,
    ) -> Result<(), ScalewayProviderError> {
        debug!(instance_id = %instance.id, action, "issuing power action");
        self.api
            .perform_instance_action_async(&instance.region, &instance.id, action)
            .await?;
        Ok(())
    }

    async fn root_volume_id(
        &self,
        zone: &str,
        instance_id: &str,
    ) -> Result<Option<String>, ScalewayProviderError> {
        Ok(self
            .attached_volumes(zone, instance_id)
            .await?
            .into_iter()
            .find_map(|(slot, id)| (slot == ROOT_SLOT).then_some(id)))
    }

    pub(super) async fn resolve_root_volume(
        &self,
        instance: &Instance,
    ) -> Result<Option<Volume>, ScalewayProviderError> {
        let Some(volume_id) = self.root_volume_id(&instance.region, &instance.id).await? else {
            return Ok(None);
        };
        Ok(self
            .fetch_volume(&instance.region, &volume_id)
            .await?
            .map(|volume| Volume {
                id: volume.id,
                region: volume.zone,
                size_bytes: volume.size,
                device: String::from(ROOT_SLOT),
            }))
    }
}
