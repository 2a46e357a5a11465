//! Resize requests, the phase state machine, and per-run session state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::{Instance, Volume};

use super::error::ResizeRequestError;

/// Immutable input describing one root volume resize.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResizeRequest {
    /// Instance whose root volume should grow.
    pub instance_id: String,
    /// Region or availability zone hosting the instance.
    pub region: String,
    /// Target root volume size in bytes.
    pub new_size_bytes: u64,
}

impl ResizeRequest {
    /// Creates a request, trimming string inputs.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        region: impl Into<String>,
        new_size_bytes: u64,
    ) -> Self {
        Self {
            instance_id: instance_id.into().trim().to_owned(),
            region: region.into().trim().to_owned(),
            new_size_bytes,
        }
    }

    /// Validates the request.
    ///
    /// Whether the target exceeds the current size can only be checked once
    /// the volume has been observed; the orchestrator does that before any
    /// stop or detach.
    ///
    /// # Errors
    ///
    /// Returns [`ResizeRequestError`] when a field is empty or the size is
    /// zero.
    pub fn validate(&self) -> Result<(), ResizeRequestError> {
        if self.instance_id.is_empty() {
            return Err(ResizeRequestError::MissingField("instance_id"));
        }
        if self.region.is_empty() {
            return Err(ResizeRequestError::MissingField("region"));
        }
        if self.new_size_bytes == 0 {
            return Err(ResizeRequestError::ZeroSize);
        }
        Ok(())
    }
}

/// Step of the resize state machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Session created; nothing issued yet.
    Initialized,
    /// Stop issued, waiting for the instance to power off.
    Stopping,
    /// Instance confirmed stopped.
    Stopped,
    /// Detach issued, waiting for the root volume to free up.
    Detaching,
    /// Original root volume confirmed detached.
    Detached,
    /// Clone issued, waiting for the new volume.
    Cloning,
    /// New volume confirmed available.
    Cloned,
    /// Attach issued, waiting for the new volume to show as in use.
    Attaching,
    /// New volume confirmed attached in the root slot.
    Attached,
    /// Start issued, waiting for the instance to run.
    Starting,
    /// Instance running on the resized root volume.
    Completed,
    /// Terminal failure.
    Failed {
        /// Phase in which the failure occurred.
        at: Box<Phase>,
        /// Failure category.
        cause: FailureKind,
    },
    /// Terminal failure after the partially created clone was removed.
    RolledBack {
        /// Phase in which the failure occurred.
        from: Box<Phase>,
    },
}

impl Phase {
    /// Returns `true` for `Completed`, `Failed`, and `RolledBack`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::RolledBack { .. }
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => formatter.write_str("initialized"),
            Self::Stopping => formatter.write_str("stopping"),
            Self::Stopped => formatter.write_str("stopped"),
            Self::Detaching => formatter.write_str("detaching"),
            Self::Detached => formatter.write_str("detached"),
            Self::Cloning => formatter.write_str("cloning"),
            Self::Cloned => formatter.write_str("cloned"),
            Self::Attaching => formatter.write_str("attaching"),
            Self::Attached => formatter.write_str("attached"),
            Self::Starting => formatter.write_str("starting"),
            Self::Completed => formatter.write_str("completed"),
            Self::Failed { at, cause } => write!(formatter, "failed at {at} ({cause})"),
            Self::RolledBack { from } => write!(formatter, "rolled back from {from}"),
        }
    }
}

/// Category recorded in [`Phase::Failed`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The instance or its root volume could not be resolved.
    NotFound,
    /// The target size does not exceed the current size.
    InvalidSize,
    /// The provider rejected an operation.
    Provider,
    /// A wait exceeded its deadline.
    Timeout,
    /// The caller cancelled the run.
    Cancelled,
    /// A phase precondition did not hold.
    Precondition,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not found",
            Self::InvalidSize => "invalid size",
            Self::Provider => "provider error",
            Self::Timeout => "transition timeout",
            Self::Cancelled => "cancelled",
            Self::Precondition => "precondition violated",
        };
        formatter.write_str(label)
    }
}

/// Working state for one in-flight resize.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResizeSession {
    /// Request that started the run.
    pub request: ResizeRequest,
    /// Instance handle once resolved.
    pub instance: Option<Instance>,
    /// Root volume the instance booted from before the resize.
    pub original_volume: Option<Volume>,
    /// Replacement volume once the clone exists.
    pub cloned_volume: Option<Volume>,
    /// Current phase.
    pub phase: Phase,
    /// Whether the original volume was deleted after completion.
    pub original_volume_deleted: bool,
    /// Whether the clone was deleted while rolling back.
    pub cloned_volume_removed: bool,
}

impl ResizeSession {
    /// Starts a session in [`Phase::Initialized`].
    #[must_use]
    pub const fn new(request: ResizeRequest) -> Self {
        Self {
            request,
            instance: None,
            original_volume: None,
            cloned_volume: None,
            phase: Phase::Initialized,
            original_volume_deleted: false,
            cloned_volume_removed: false,
        }
    }

    /// Returns the instance identifier this session targets.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.request.instance_id
    }

    /// Returns `true` once the session reached [`Phase::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Builds the recovery report for the current state.
    #[must_use]
    pub fn recovery_report(&self) -> RecoveryReport {
        let at = match &self.phase {
            Phase::Failed { at, .. } => at.as_ref(),
            Phase::RolledBack { from } => from.as_ref(),
            other => other,
        };
        RecoveryReport {
            phase: at.clone(),
            instance_id: self.request.instance_id.clone(),
            original_volume_id: self.original_volume.as_ref().map(|volume| volume.id.clone()),
            original_volume: self.original_volume_state(at),
            cloned_volume_id: self.cloned_volume.as_ref().map(|volume| volume.id.clone()),
            cloned_volume_removed: self.cloned_volume_removed,
        }
    }

    fn original_volume_state(&self, at: &Phase) -> OriginalVolumeState {
        if self.original_volume_deleted {
            return OriginalVolumeState::Deleted;
        }
        match at {
            Phase::Initialized | Phase::Stopping | Phase::Stopped => {
                OriginalVolumeState::AttachedToInstance
            }
            Phase::Detaching => OriginalVolumeState::DetachRequested,
            _ => OriginalVolumeState::DetachedIntact,
        }
    }
}

/// Where the original root volume stands after a run ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginalVolumeState {
    /// Still attached as root; the instance can boot from it.
    AttachedToInstance,
    /// Detach was issued but not confirmed.
    DetachRequested,
    /// Detached and untouched.
    DetachedIntact,
    /// Deleted after a completed resize.
    Deleted,
}

/// Operator-facing summary of what a failed run left behind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Phase in which the run stopped.
    pub phase: Phase,
    /// Target instance.
    pub instance_id: String,
    /// Original root volume, when it was resolved.
    pub original_volume_id: Option<String>,
    /// State of the original root volume.
    pub original_volume: OriginalVolumeState,
    /// Clone created during the run, if any.
    pub cloned_volume_id: Option<String>,
    /// Whether that clone was deleted during rollback.
    pub cloned_volume_removed: bool,
}

impl RecoveryReport {
    /// Returns `true` while the original volume still exists.
    #[must_use]
    pub const fn original_volume_exists(&self) -> bool {
        !matches!(self.original_volume, OriginalVolumeState::Deleted)
    }

    /// Returns `true` when the original volume is still the instance's root.
    #[must_use]
    pub const fn original_volume_attached(&self) -> bool {
        matches!(self.original_volume, OriginalVolumeState::AttachedToInstance)
    }

    /// Suggested next step for an operator.
    #[must_use]
    pub const fn advice(&self) -> &'static str {
        match self.original_volume {
            OriginalVolumeState::AttachedToInstance => {
                "the instance still boots from its original root volume; start it if it is stopped"
            }
            OriginalVolumeState::DetachRequested => {
                "inspect the original root volume; it may still be detaching from the stopped instance"
            }
            OriginalVolumeState::DetachedIntact => {
                "the instance is stopped without its original root volume; reattach it or finish the swap manually"
            }
            OriginalVolumeState::Deleted => "no recovery needed for the original root volume",
        }
    }
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let original = self.original_volume_id.as_deref().unwrap_or("<unresolved>");
        let state = match self.original_volume {
            OriginalVolumeState::AttachedToInstance => "still attached",
            OriginalVolumeState::DetachRequested => "detach requested",
            OriginalVolumeState::DetachedIntact => "detached but intact",
            OriginalVolumeState::Deleted => "deleted",
        };
        write!(
            formatter,
            "instance {} stopped in phase {}; original volume {original} is {state}",
            self.instance_id, self.phase
        )?;
        if let Some(clone) = &self.cloned_volume_id {
            if self.cloned_volume_removed {
                write!(formatter, "; clone {clone} was removed")?;
            } else {
                write!(formatter, "; clone {clone} still exists")?;
            }
        }
        write!(formatter, "; {}", self.advice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn volume(id: &str) -> Volume {
        Volume {
            id: id.to_owned(),
            region: String::from("fr-par-1"),
            size_bytes: 4,
            device: String::from("0"),
        }
    }

    #[rstest]
    #[case("", "fr-par-1", 8)]
    #[case("i-1", "  ", 8)]
    #[case("i-1", "fr-par-1", 0)]
    fn validate_rejects_incomplete_requests(
        #[case] instance_id: &str,
        #[case] region: &str,
        #[case] size: u64,
    ) {
        let request = ResizeRequest::new(instance_id, region, size);
        assert!(request.validate().is_err(), "request should be rejected: {request:?}");
    }

    #[rstest]
    #[case(Phase::Stopping, OriginalVolumeState::AttachedToInstance)]
    #[case(Phase::Detaching, OriginalVolumeState::DetachRequested)]
    #[case(Phase::Cloning, OriginalVolumeState::DetachedIntact)]
    #[case(Phase::Starting, OriginalVolumeState::DetachedIntact)]
    fn recovery_report_tracks_original_volume(
        #[case] at: Phase,
        #[case] expected: OriginalVolumeState,
    ) {
        let mut session = ResizeSession::new(ResizeRequest::new("i-1", "fr-par-1", 8));
        session.original_volume = Some(volume("vol-1"));
        session.phase = Phase::Failed {
            at: Box::new(at.clone()),
            cause: FailureKind::Provider,
        };

        let report = session.recovery_report();

        assert_eq!(report.phase, at);
        assert_eq!(report.original_volume, expected);
        assert!(report.original_volume_exists());
    }

    #[test]
    fn recovery_report_mentions_surviving_clone() {
        let mut session = ResizeSession::new(ResizeRequest::new("i-1", "fr-par-1", 8));
        session.original_volume = Some(volume("vol-1"));
        session.cloned_volume = Some(volume("vol-2"));
        session.phase = Phase::Failed {
            at: Box::new(Phase::Attaching),
            cause: FailureKind::Timeout,
        };

        let rendered = session.recovery_report().to_string();

        assert!(rendered.contains("vol-1 is detached but intact"), "{rendered}");
        assert!(rendered.contains("clone vol-2 still exists"), "{rendered}");
    }

    #[test]
    fn session_serialises_phase_label() {
        let session = ResizeSession::new(ResizeRequest::new("i-1", "fr-par-1", 8));
        let json = serde_json::to_string(&session).expect("serialise");
        assert!(json.contains(r#""phase":"initialized""#), "{json}");
    }
}
