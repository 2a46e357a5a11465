//! Direct HTTP access to the Instances API endpoints `scaleway-rs` lacks.
//!
//! Volume, snapshot, and attachment endpoints are called with `reqwest`
//! using the same secret key as the SDK client.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ScalewayProvider, ScalewayProviderError};

pub(super) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Volume representation returned by `GET /volumes/{id}`.
#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiVolume {
    pub id: String,
    pub size: u64,
    pub state: String,
    pub volume_type: String,
    pub zone: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub server: Option<ApiServerRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiServerRef {
    pub id: String,
}

#[derive(Deserialize)]
pub(super) struct VolumeEnvelope {
    pub volume: ApiVolume,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiSnapshot {
    pub id: String,
    pub state: String,
}

#[derive(Deserialize)]
pub(super) struct SnapshotEnvelope {
    pub snapshot: ApiSnapshot,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateSnapshotRequest {
    pub name: String,
    pub volume_id: String,
    pub project: String,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateVolumeRequest {
    pub name: String,
    pub project: String,
    pub volume_type: String,
    pub size: u64,
    pub base_snapshot: String,
}

#[derive(Debug, Serialize)]
pub(super) struct DetachVolumeRequest {
    pub volume_id: String,
}

/// Volume reference for attachment in the Scaleway API.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(super) struct VolumeAttachment {
    pub id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub boot: bool,
}

/// Request body for `PATCH /servers/{id}` replacing the volume map.
#[derive(Clone, Debug, Serialize)]
pub(super) struct UpdateInstanceVolumesRequest {
    /// Volume map keyed by slot ("0" for root).
    pub volumes: HashMap<String, VolumeAttachment>,
}

impl UpdateInstanceVolumesRequest {
    /// Builds the volume map that places `volume_id` in `device` while
    /// preserving every other attached volume.
    pub(super) fn with_volume_in_slot<'a>(
        current: impl IntoIterator<Item = (&'a str, &'a str)>,
        device: &str,
        volume_id: &str,
    ) -> Self {
        let mut volumes: HashMap<String, VolumeAttachment> = current
            .into_iter()
            .filter(|(slot, _)| *slot != device)
            .map(|(slot, id)| {
                (
                    slot.to_owned(),
                    VolumeAttachment {
                        id: id.to_owned(),
                        boot: false,
                    },
                )
            })
            .collect();
        volumes.insert(
            device.to_owned(),
            VolumeAttachment {
                id: volume_id.to_owned(),
                boot: device == "0",
            },
        );
        Self { volumes }
    }
}

/// Status and body of a completed HTTP exchange.
pub(super) struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub(super) fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub(super) fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ScalewayProviderError> {
        serde_json::from_slice(&self.body).map_err(|err| ScalewayProviderError::Provider {
            message: err.to_string(),
        })
    }
}

impl ScalewayProvider {
    /// Sends a request to `/zones/{zone}/{path}` with an optional JSON body.
    pub(super) async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        zone: &str,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse, ScalewayProviderError> {
        let url = format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{zone}/{path}");
        let mut request = HTTP_CLIENT
            .request(method, &url)
            .header("X-Auth-Token", &self.config.secret_key)
            .timeout(HTTP_TIMEOUT);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(ApiResponse { status, body })
    }

    /// Fetches a volume, returning `None` on 404.
    pub(super) async fn fetch_volume(
        &self,
        zone: &str,
        volume_id: &str,
    ) -> Result<Option<ApiVolume>, ScalewayProviderError> {
        let response = self
            .call::<()>(Method::GET, zone, &format!("volumes/{volume_id}"), None)
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(ScalewayProviderError::Provider {
                message: response.text(),
            });
        }
        let envelope: VolumeEnvelope = response.parse()?;
        Ok(Some(envelope.volume))
    }
}
