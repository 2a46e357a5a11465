//! Error types for the resize workflow and the guest filesystem step.

use std::time::Duration;

use thiserror::Error;

use crate::remote::RemoteError;

use super::session::{Phase, RecoveryReport};

/// Errors raised while validating a [`super::ResizeRequest`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResizeRequestError {
    /// Raised when a required string field is empty.
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    /// Raised when the target size is zero.
    #[error("target size must be greater than zero")]
    ZeroSize,
}

/// Errors surfaced by [`super::ResizeOrchestrator::resize`].
///
/// Every variant raised after the run started carries a [`RecoveryReport`]
/// describing whether the original root volume still exists and whether it is
/// attached.
#[derive(Debug, Error)]
pub enum ResizeError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when the request fails validation.
    #[error("invalid resize request: {0}")]
    InvalidRequest(#[from] ResizeRequestError),
    /// Raised when another resize for the same instance is still active.
    #[error("a resize is already in progress for instance {instance_id}")]
    Conflict {
        /// Instance that already has an active session.
        instance_id: String,
    },
    /// Raised when the instance does not resolve; nothing was changed.
    #[error("instance {instance_id} not found in {region}")]
    InstanceNotFound {
        /// Requested instance.
        instance_id: String,
        /// Requested region.
        region: String,
    },
    /// Raised when the stopped instance has no root volume to resize.
    #[error("instance has no root volume: {report}")]
    RootVolumeNotFound {
        /// Recovery details.
        report: Box<RecoveryReport>,
    },
    /// Raised when the target size does not exceed the current size.
    #[error("requested size {requested} bytes does not exceed current size {current} bytes: {report}")]
    InvalidSize {
        /// Requested size in bytes.
        requested: u64,
        /// Observed root volume size in bytes.
        current: u64,
        /// Recovery details.
        report: Box<RecoveryReport>,
    },
    /// Raised when a phase is entered without its precondition holding.
    #[error("{message}: {report}")]
    Precondition {
        /// Description of the violated precondition.
        message: String,
        /// Recovery details.
        report: Box<RecoveryReport>,
    },
    /// Raised when the provider rejects an operation.
    #[error("provider call failed during {phase}: {source}; {report}")]
    Provider {
        /// Phase in which the call failed.
        phase: Phase,
        /// Recovery details.
        report: Box<RecoveryReport>,
        /// Provider error.
        #[source]
        source: ProviderError,
    },
    /// Raised when a wait for state convergence exceeds its deadline.
    #[error(
        "timed out after {}s during {phase}; last observed status: {last_status}; {report}",
        .waited.as_secs()
    )]
    TransitionTimeout {
        /// Phase whose wait expired.
        phase: Phase,
        /// Last status observed before the deadline.
        last_status: String,
        /// Time spent waiting.
        waited: Duration,
        /// Recovery details.
        report: Box<RecoveryReport>,
    },
    /// Raised when the caller cancels a run.
    #[error("resize cancelled during {phase}; {report}")]
    Cancelled {
        /// Phase in which the cancellation was observed.
        phase: Phase,
        /// Recovery details.
        report: Box<RecoveryReport>,
    },
}

impl<ProviderError> ResizeError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Returns the recovery report when the run got far enough to produce one.
    #[must_use]
    pub fn recovery(&self) -> Option<&RecoveryReport> {
        match self {
            Self::InvalidRequest(_) | Self::Conflict { .. } | Self::InstanceNotFound { .. } => None,
            Self::RootVolumeNotFound { report }
            | Self::InvalidSize { report, .. }
            | Self::Precondition { report, .. }
            | Self::Provider { report, .. }
            | Self::TransitionTimeout { report, .. }
            | Self::Cancelled { report, .. } => Some(report),
        }
    }
}

/// Errors surfaced by [`super::ResizeOrchestrator::run_guest_resize`].
///
/// None of these undo the volume resize; the guest step can be retried on
/// its own.
#[derive(Debug, Error)]
pub enum GuestResizeError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when the session never reached [`Phase::Completed`].
    #[error("guest resize requires a completed session; session is {phase}")]
    NotCompleted {
        /// Phase the session is in.
        phase: Phase,
    },
    /// Raised when the instance no longer resolves.
    #[error("instance {instance_id} not found in {region}")]
    InstanceNotFound {
        /// Requested instance.
        instance_id: String,
        /// Requested region.
        region: String,
    },
    /// Raised when refreshing the instance fails.
    #[error("failed to refresh instance: {0}")]
    Provider(#[source] ProviderError),
    /// Raised when the instance exposes no public address.
    #[error("instance {instance_id} has no public address")]
    MissingAddress {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when the login port never accepts connections.
    #[error("login port {port} on {instance_id} unreachable after {}s", .waited.as_secs())]
    LoginUnreachable {
        /// Provider instance identifier.
        instance_id: String,
        /// Probed port.
        port: u16,
        /// Time spent probing.
        waited: Duration,
    },
    /// Raised when the remote command cannot be executed.
    #[error("failed to run filesystem grow command: {0}")]
    Connection(#[source] RemoteError),
    /// Raised when the grow command exits unsuccessfully.
    #[error("filesystem grow command exited with {}: {stderr}", describe_status(.status))]
    CommandFailed {
        /// Remote exit status, when reported.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

fn describe_status(status: &Option<i32>) -> String {
    status.map_or_else(|| String::from("no status"), |code| format!("status {code}"))
}
