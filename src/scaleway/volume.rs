//! Volume detach, attach, clone, and delete through the Instances API.

use std::time::Instant;

use reqwest::{Method, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::{Instance, Volume, VolumeStatus};

use super::api::{
    ApiResponse, ApiVolume, CreateSnapshotRequest, CreateVolumeRequest, DetachVolumeRequest, SnapshotEnvelope,
    UpdateInstanceVolumesRequest, VolumeEnvelope,
};
use super::types::VolumeState;
use super::{ScalewayProvider, ScalewayProviderError};

impl ScalewayProvider {
    pub(super) async fn observe_volume(
        &self,
        volume: &Volume,
    ) -> Result<VolumeStatus, ScalewayProviderError> {
        let found = self.require_volume(&volume.region, &volume.id).await?;
        let state = VolumeState::from(found.state);
        Ok(state.to_status(found.server.as_ref().map(|server| server.id.as_str())))
    }

    /// Detaches a volume through the dedicated `detach-volume` action.
    pub(super) async fn detach(
        &self,
        volume: &Volume,
        instance: &Instance,
    ) -> Result<(), ScalewayProviderError> {
        let payload = DetachVolumeRequest {
            volume_id: volume.id.clone(),
        };
        let response = self
            .call(
                Method::POST,
                &instance.region,
                &format!("servers/{}/detach-volume", instance.id),
                Some(&payload),
            )
            .await?;

        if response.status.is_success() {
            return Ok(());
        }
        Err(ScalewayProviderError::VolumeDetachFailed {
            volume_id: volume.id.clone(),
            instance_id: instance.id.clone(),
            message: response.text(),
        })
    }

    /// Attaches a volume to a stopped instance in the given slot.
    ///
    /// The attachment rewrites the server's volume map with a PATCH call,
    /// preserving every other attached volume.
    pub(super) async fn attach(
        &self,
        volume: &Volume,
        instance: &Instance,
        device: &str,
    ) -> Result<(), ScalewayProviderError> {
        let current = self.attached_volumes(&instance.region, &instance.id).await?;
        let request = UpdateInstanceVolumesRequest::with_volume_in_slot(
            current.iter().map(|(slot, id)| (slot.as_str(), id.as_str())),
            device,
            &volume.id,
        );
        let response = self
            .call(
                Method::PATCH,
                &instance.region,
                &format!("servers/{}", instance.id),
                Some(&request),
            )
            .await?;

        if response.status.is_success() {
            return Ok(());
        }
        Err(ScalewayProviderError::VolumeAttachmentFailed {
            volume_id: volume.id.clone(),
            instance_id: instance.id.clone(),
            message: response.text(),
        })
    }

    /// Clones a detached volume at a larger size via an intermediate
    /// snapshot.
    ///
    /// The snapshot is deleted once the new volume has been requested; a
    /// failed deletion is logged and otherwise ignored.
    pub(super) async fn clone_with_size(
        &self,
        volume: &Volume,
        size_bytes: u64,
    ) -> Result<Volume, ScalewayProviderError> {
        let source = self.require_volume(&volume.region, &volume.id).await?;
        let project = source
            .project
            .clone()
            .unwrap_or_else(|| self.config.default_project_id.clone());
        let suffix = Uuid::new_v4().simple().to_string();

        let snapshot_id = self.snapshot(&source, &project, &suffix).await?;
        let created = self
            .create_from_snapshot(&source, &project, &suffix, &snapshot_id, size_bytes)
            .await;
        self.delete_snapshot_best_effort(&volume.region, &snapshot_id)
            .await;
        let created = created?;

        Ok(Volume {
            id: created.id,
            region: created.zone,
            size_bytes: created.size,
            device: volume.device.clone(),
        })
    }

    pub(super) async fn delete(&self, volume: &Volume) -> Result<(), ScalewayProviderError> {
        let response = self
            .call::<()>(
                Method::DELETE,
                &volume.region,
                &format!("volumes/{}", volume.id),
                None,
            )
            .await?;

        if response.status.is_success() {
            return Ok(());
        }
        if response.status == StatusCode::NOT_FOUND {
            return Err(ScalewayProviderError::VolumeNotFound {
                volume_id: volume.id.clone(),
                zone: volume.region.clone(),
            });
        }
        Err(ScalewayProviderError::Provider {
            message: response.text(),
        })
    }

    async fn require_volume(
        &self,
        zone: &str,
        volume_id: &str,
    ) -> Result<ApiVolume, ScalewayProviderError> {
        self.fetch_volume(zone, volume_id)
            .await?
            .ok_or_else(|| ScalewayProviderError::VolumeNotFound {
                volume_id: volume_id.to_owned(),
                zone: zone.to_owned(),
            })
    }

    async fn snapshot(
        &self,
        source: &ApiVolume,
        project: &str,
        suffix: &str,
    ) -> Result<String, ScalewayProviderError> {
        let payload = CreateSnapshotRequest {
            name: format!("rootgrow-{suffix}"),
            volume_id: source.id.clone(),
            project: project.to_owned(),
        };
        let response = self
            .call(Method::POST, &source.zone, "snapshots", Some(&payload))
            .await?;
        if !response.status.is_success() {
            return Err(ScalewayProviderError::SnapshotFailed {
                volume_id: source.id.clone(),
                message: response.text(),
            });
        }
        let envelope: SnapshotEnvelope = response.parse()?;
        let snapshot_id = envelope.snapshot.id;
        self.wait_for_snapshot(&source.zone, &source.id, &snapshot_id)
            .await?;
        Ok(snapshot_id)
    }

    async fn wait_for_snapshot(
        &self,
        zone: &str,
        volume_id: &str,
        snapshot_id: &str,
    ) -> Result<(), ScalewayProviderError> {
        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            let response = self
                .call::<()>(Method::GET, zone, &format!("snapshots/{snapshot_id}"), None)
                .await?;
            match snapshot_progress(&response, volume_id, snapshot_id)? {
                SnapshotProgress::Ready => return Ok(()),
                SnapshotProgress::Pending(state) => {
                    debug!(snapshot_id, state = %state, "snapshot not ready");
                }
            }
            sleep(self.poll_interval).await;
        }

        Err(ScalewayProviderError::Timeout {
            action: String::from("snapshot"),
            resource_id: snapshot_id.to_owned(),
        })
    }

    async fn create_from_snapshot(
        &self,
        source: &ApiVolume,
        project: &str,
        suffix: &str,
        snapshot_id: &str,
        size_bytes: u64,
    ) -> Result<ApiVolume, ScalewayProviderError> {
        let name = format!("rootgrow-{suffix}");
        let payload = CreateVolumeRequest {
            name: name.clone(),
            project: project.to_owned(),
            volume_type: source.volume_type.clone(),
            size: size_bytes,
            base_snapshot: snapshot_id.to_owned(),
        };
        let response = self
            .call(Method::POST, &source.zone, "volumes", Some(&payload))
            .await?;
        if !response.status.is_success() {
            return Err(ScalewayProviderError::VolumeCreateFailed {
                name,
                zone: source.zone.clone(),
                message: response.text(),
            });
        }
        let envelope: VolumeEnvelope = response.parse()?;
        Ok(envelope.volume)
    }

    async fn delete_snapshot_best_effort(&self, zone: &str, snapshot_id: &str) {
        let outcome = self
            .call::<()>(
                Method::DELETE,
                zone,
                &format!("snapshots/{snapshot_id}"),
                None,
            )
            .await;
        match outcome {
            Ok(response) if response.status.is_success() => {}
            Ok(response) => {
                warn!(snapshot_id, status = %response.status, "failed to delete clone snapshot");
            }
            Err(err) => warn!(snapshot_id, error = %err, "failed to delete clone snapshot"),
        }
    }
}

/// Where an intermediate clone snapshot stands.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum SnapshotProgress {
    Ready,
    /// Still being created; carries the observed state or HTTP status.
    Pending(String),
}

/// Interprets one snapshot lookup. Throttling and server errors count as
/// pending; any other non-success reply ends the clone.
pub(super) fn snapshot_progress(
    response: &ApiResponse,
    volume_id: &str,
    snapshot_id: &str,
) -> Result<SnapshotProgress, ScalewayProviderError> {
    let status = response.status;
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Ok(SnapshotProgress::Pending(status.to_string()));
    }
    if !status.is_success() {
        return Err(ScalewayProviderError::SnapshotFailed {
            volume_id: volume_id.to_owned(),
            message: format!("snapshot {snapshot_id} lookup returned {status}: {}", response.text()),
        });
    }

    let envelope: SnapshotEnvelope = response.parse()?;
    match envelope.snapshot.state.as_str() {
        "available" => Ok(SnapshotProgress::Ready),
        "error" | "invalid_data" => Err(ScalewayProviderError::SnapshotFailed {
            volume_id: volume_id.to_owned(),
            message: format!(
                "snapshot {snapshot_id} entered state {}",
                envelope.snapshot.state
            ),
        }),
        _ => Ok(SnapshotProgress::Pending(envelope.snapshot.state)),
    }
}
