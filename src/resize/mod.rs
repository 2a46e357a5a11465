//! Orchestrates root volume resizes through a [`CloudComputeProvider`].
//!
//! A resize runs strictly in order: stop the instance, detach its root
//! volume, clone that volume at the requested size, attach the clone in the
//! root slot, start the instance, and only then delete the original. Each
//! step waits for the provider to confirm the transition before the next one
//! is issued. Failures never delete the original volume; the error carries a
//! [`RecoveryReport`] describing what was left behind.

use tracing::{info, warn};

use crate::provider::{CloudComputeProvider, Instance, InstanceStatus, Volume, VolumeStatus};
use crate::session_store::{NullSessionStore, SessionStore};

mod config;
mod error;
mod flight;
mod guest;
mod session;
mod wait;

pub use config::{DEFAULT_STATE_DIR, LoginWait, ResizeConfig, ResizePolicy};
pub use error::{GuestResizeError, ResizeError, ResizeRequestError};
pub use flight::{FlightGuard, FlightRegistry};
pub use session::{
    FailureKind, OriginalVolumeState, Phase, RecoveryReport, ResizeRequest, ResizeSession,
};
pub use wait::{
    CancelHandle, CancelToken, DEFAULT_POLL_ERROR_TOLERANCE, PollPolicy, cancellation,
};

use wait::{WaitError, bounded, poll_until};

/// What happened to the original root volume after a completed resize.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OriginalVolumeDisposition {
    /// The original volume was deleted.
    Deleted,
    /// The original volume still exists.
    Retained {
        /// Why it was kept.
        reason: String,
    },
}

/// Result of a completed resize.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResizeOutcome {
    /// Final session state, in [`Phase::Completed`].
    pub session: ResizeSession,
    /// Fate of the original root volume.
    pub original_volume: OriginalVolumeDisposition,
}

/// Executes resize workflows against a provider.
#[derive(Debug)]
pub struct ResizeOrchestrator<P, S = NullSessionStore> {
    provider: P,
    store: S,
    policy: ResizePolicy,
    flights: FlightRegistry,
}

impl<P: CloudComputeProvider> ResizeOrchestrator<P> {
    /// Creates an orchestrator with default timings and no persistence.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            store: NullSessionStore,
            policy: ResizePolicy::default(),
            flights: FlightRegistry::new(),
        }
    }
}

impl<P, S> ResizeOrchestrator<P, S>
where
    P: CloudComputeProvider,
    S: SessionStore,
{
    /// Replaces the session store.
    #[must_use]
    pub fn with_store<T: SessionStore>(self, store: T) -> ResizeOrchestrator<P, T> {
        ResizeOrchestrator {
            provider: self.provider,
            store,
            policy: self.policy,
            flights: self.flights,
        }
    }

    /// Overrides timings and behaviour.
    #[must_use]
    pub const fn with_policy(mut self, policy: ResizePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shares a single-flight registry with other orchestrators.
    #[must_use]
    pub fn with_flights(mut self, flights: FlightRegistry) -> Self {
        self.flights = flights;
        self
    }

    /// Registry of instances with an active resize.
    #[must_use]
    pub const fn flights(&self) -> &FlightRegistry {
        &self.flights
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> &ResizePolicy {
        &self.policy
    }

    /// Underlying provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs a resize to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ResizeError`] when validation fails, another resize for the
    /// instance is active, or any phase fails. Errors raised after the
    /// instance resolved carry a [`RecoveryReport`].
    pub async fn resize(
        &self,
        request: ResizeRequest,
    ) -> Result<ResizeOutcome, ResizeError<P::Error>> {
        self.resize_with_cancel(request, &CancelToken::never()).await
    }

    /// Runs a resize that stops at the next phase boundary or poll once
    /// `cancel` fires. Provider operations already issued are not undone.
    ///
    /// # Errors
    ///
    /// As [`ResizeOrchestrator::resize`], plus [`ResizeError::Cancelled`].
    pub async fn resize_with_cancel(
        &self,
        request: ResizeRequest,
        cancel: &CancelToken,
    ) -> Result<ResizeOutcome, ResizeError<P::Error>> {
        request.validate()?;
        let Some(_guard) = self.flights.try_acquire(&request.instance_id) else {
            return Err(ResizeError::Conflict {
                instance_id: request.instance_id,
            });
        };

        let mut run = Run {
            orchestrator: self,
            cancel,
            session: ResizeSession::new(request),
        };
        run.execute().await
    }
}

/// State for a single resize run.
struct Run<'a, P, S> {
    orchestrator: &'a ResizeOrchestrator<P, S>,
    cancel: &'a CancelToken,
    session: ResizeSession,
}

impl<P, S> Run<'_, P, S>
where
    P: CloudComputeProvider,
    S: SessionStore,
{
    async fn execute(&mut self) -> Result<ResizeOutcome, ResizeError<P::Error>> {
        info!(
            instance_id = %self.session.instance_id(),
            region = %self.session.request.region,
            new_size_bytes = self.session.request.new_size_bytes,
            "starting root volume resize"
        );
        self.persist();

        let instance = self.resolve_instance().await?;
        self.stop(&instance).await?;
        let original = self.detach(&instance).await?;
        let clone = self.clone_original(&original).await?;
        self.attach(&clone, &instance, &original.device).await?;
        self.start(&instance).await?;
        Ok(self.finish(&original).await)
    }

    async fn resolve_instance(&mut self) -> Result<Instance, ResizeError<P::Error>> {
        let orchestrator = self.orchestrator;
        let request = self.session.request.clone();
        let found = bounded(
            &orchestrator.policy.stop,
            self.cancel,
            "instance lookup",
            orchestrator
                .provider
                .get_instance(&request.instance_id, &request.region),
        )
        .await
        .map_err(|err| self.wait_failed(err))?;

        let Some(instance) = found else {
            self.fail(FailureKind::NotFound);
            return Err(ResizeError::InstanceNotFound {
                instance_id: request.instance_id,
                region: request.region,
            });
        };
        self.session.instance = Some(instance.clone());

        if let Some(current) = instance.root_volume_size {
            self.check_size(current)?;
        }
        Ok(instance)
    }

    async fn stop(&mut self, instance: &Instance) -> Result<(), ResizeError<P::Error>> {
        self.checkpoint()?;
        let orchestrator = self.orchestrator;

        match &instance.status {
            InstanceStatus::Stopped => {
                info!(instance_id = %instance.id, "instance already stopped");
                self.transition(Phase::Stopped);
                return Ok(());
            }
            InstanceStatus::Running => {
                self.transition(Phase::Stopping);
                bounded(
                    &orchestrator.policy.stop,
                    self.cancel,
                    "stop",
                    orchestrator.provider.stop_instance(instance),
                )
                .await
                .map_err(|err| self.wait_failed(err))?;
            }
            InstanceStatus::Transitioning(state) => {
                info!(instance_id = %instance.id, state = %state, "instance is mid-transition; waiting for it to stop");
                self.transition(Phase::Stopping);
            }
        }

        poll_until(
            &orchestrator.policy.stop,
            self.cancel,
            "instance",
            || orchestrator.provider.instance_status(instance),
            |status| *status == InstanceStatus::Stopped,
        )
        .await
        .map_err(|err| self.wait_failed(err))?;
        self.transition(Phase::Stopped);
        Ok(())
    }

    async fn detach(&mut self, instance: &Instance) -> Result<Volume, ResizeError<P::Error>> {
        self.checkpoint()?;
        self.require(&Phase::Stopped, "refusing to detach the root volume of a running instance")?;
        let orchestrator = self.orchestrator;

        let found = bounded(
            &orchestrator.policy.detach,
            self.cancel,
            "root volume lookup",
            orchestrator.provider.root_volume(instance),
        )
        .await
        .map_err(|err| self.wait_failed(err))?;
        let Some(original) = found else {
            let report = self.fail(FailureKind::NotFound);
            return Err(ResizeError::RootVolumeNotFound { report });
        };
        self.session.original_volume = Some(original.clone());
        self.check_size(original.size_bytes)?;

        self.transition(Phase::Detaching);
        bounded(
            &orchestrator.policy.detach,
            self.cancel,
            "detach",
            orchestrator.provider.detach_volume(&original, instance),
        )
        .await
        .map_err(|err| self.wait_failed(err))?;

        poll_until(
            &orchestrator.policy.detach,
            self.cancel,
            "original volume",
            || orchestrator.provider.volume_status(&original),
            |status| *status == VolumeStatus::Available,
        )
        .await
        .map_err(|err| self.wait_failed(err))?;
        self.transition(Phase::Detached);
        Ok(original)
    }

    async fn clone_original(&mut self, original: &Volume) -> Result<Volume, ResizeError<P::Error>> {
        self.checkpoint()?;
        let orchestrator = self.orchestrator;
        let size = self.session.request.new_size_bytes;

        self.transition(Phase::Cloning);
        let clone = bounded(
            &orchestrator.policy.clone,
            self.cancel,
            "clone",
            orchestrator.provider.clone_volume(original, size),
        )
        .await
        .map_err(|err| self.wait_failed(err))?;
        info!(original = %original.id, clone = %clone.id, size_bytes = size, "clone requested");
        self.session.cloned_volume = Some(clone.clone());
        self.persist();

        poll_until(
            &orchestrator.policy.clone,
            self.cancel,
            "cloned volume",
            || orchestrator.provider.volume_status(&clone),
            |status| *status == VolumeStatus::Available,
        )
        .await
        .map_err(|err| self.wait_failed(err))?;
        self.transition(Phase::Cloned);
        Ok(clone)
    }

    async fn attach(
        &mut self,
        clone: &Volume,
        instance: &Instance,
        device: &str,
    ) -> Result<(), ResizeError<P::Error>> {
        self.checkpoint()?;
        self.require(&Phase::Cloned, "refusing to attach a clone that is not available")?;
        let orchestrator = self.orchestrator;

        self.transition(Phase::Attaching);
        let attached = bounded(
            &orchestrator.policy.attach,
            self.cancel,
            "attach",
            orchestrator.provider.attach_volume(clone, instance, device),
        )
        .await;
        match attached {
            Ok(()) => {}
            Err(WaitError::Provider(err)) => return Err(self.roll_back_attach(clone, err).await),
            Err(err) => return Err(self.wait_failed(err)),
        }

        poll_until(
            &orchestrator.policy.attach,
            self.cancel,
            "cloned volume",
            || orchestrator.provider.volume_status(clone),
            |status| status.is_attached_to(&instance.id),
        )
        .await
        .map_err(|err| self.wait_failed(err))?;
        self.transition(Phase::Attached);
        Ok(())
    }

    /// Deletes the clone when the attach call failed and the clone is still
    /// unattached; otherwise leaves it for the operator.
    async fn roll_back_attach(&mut self, clone: &Volume, cause: P::Error) -> ResizeError<P::Error> {
        let orchestrator = self.orchestrator;
        let provider = &orchestrator.provider;
        let never = CancelToken::never();
        let observed = bounded(
            &orchestrator.policy.attach,
            &never,
            "clone status",
            provider.volume_status(clone),
        )
        .await;
        let unattached = matches!(observed, Ok(VolumeStatus::Available));
        if !unattached {
            warn!(clone = %clone.id, "attach failed; clone state unknown, leaving it in place");
            return self.provider_failed(cause);
        }

        if let Err(err) = bounded(
            &orchestrator.policy.attach,
            &never,
            "clone removal",
            provider.delete_volume(clone),
        )
        .await
        {
            warn!(clone = %clone.id, error = %err, "attach failed and the clone could not be removed");
            return self.provider_failed(cause);
        }

        warn!(clone = %clone.id, error = %cause, "attach failed; removed the clone");
        self.session.cloned_volume_removed = true;
        let from = self.session.phase.clone();
        self.session.phase = Phase::RolledBack {
            from: Box::new(from.clone()),
        };
        self.persist();
        ResizeError::Provider {
            phase: from,
            report: Box::new(self.session.recovery_report()),
            source: cause,
        }
    }

    async fn start(&mut self, instance: &Instance) -> Result<(), ResizeError<P::Error>> {
        self.checkpoint()?;
        self.require(&Phase::Attached, "refusing to start an instance without its new root volume")?;
        let orchestrator = self.orchestrator;

        self.transition(Phase::Starting);
        bounded(
            &orchestrator.policy.start,
            self.cancel,
            "start",
            orchestrator.provider.start_instance(instance),
        )
        .await
        .map_err(|err| self.wait_failed(err))?;

        poll_until(
            &orchestrator.policy.start,
            self.cancel,
            "instance",
            || orchestrator.provider.instance_status(instance),
            |status| *status == InstanceStatus::Running,
        )
        .await
        .map_err(|err| self.wait_failed(err))?;
        self.transition(Phase::Completed);
        Ok(())
    }

    async fn finish(&mut self, original: &Volume) -> ResizeOutcome {
        let disposition = self.dispose_original(original).await;
        if let OriginalVolumeDisposition::Retained { reason } = &disposition {
            warn!(original = %original.id, reason = %reason, "original root volume retained");
        }
        info!(instance_id = %self.session.instance_id(), "root volume resize completed");
        ResizeOutcome {
            session: self.session.clone(),
            original_volume: disposition,
        }
    }

    async fn dispose_original(&mut self, original: &Volume) -> OriginalVolumeDisposition {
        if self.orchestrator.policy.keep_original_volume {
            return OriginalVolumeDisposition::Retained {
                reason: String::from("keep_original_volume is enabled"),
            };
        }
        if self.cancel.is_cancelled() {
            return OriginalVolumeDisposition::Retained {
                reason: String::from("cancelled before the original volume was deleted"),
            };
        }

        let orchestrator = self.orchestrator;
        let deleted = bounded(
            &orchestrator.policy.detach,
            self.cancel,
            "delete original",
            orchestrator.provider.delete_volume(original),
        )
        .await;
        match deleted {
            Ok(()) => {
                info!(original = %original.id, "deleted original root volume");
                self.session.original_volume_deleted = true;
                self.persist();
                OriginalVolumeDisposition::Deleted
            }
            Err(WaitError::Provider(err)) => OriginalVolumeDisposition::Retained {
                reason: format!("delete failed: {err}"),
            },
            Err(WaitError::Timeout { .. }) => OriginalVolumeDisposition::Retained {
                reason: String::from("delete request unanswered before the deadline; check the volume"),
            },
            Err(WaitError::Cancelled) => OriginalVolumeDisposition::Retained {
                reason: String::from("cancelled while deleting; check the volume"),
            },
        }
    }

    fn check_size(&mut self, current: u64) -> Result<(), ResizeError<P::Error>> {
        let requested = self.session.request.new_size_bytes;
        if requested > current {
            return Ok(());
        }
        let report = self.fail(FailureKind::InvalidSize);
        Err(ResizeError::InvalidSize {
            requested,
            current,
            report,
        })
    }

    fn require(&mut self, expected: &Phase, what: &str) -> Result<(), ResizeError<P::Error>> {
        if self.session.phase == *expected {
            return Ok(());
        }
        let message = format!("{what} (phase is {})", self.session.phase);
        let report = self.fail(FailureKind::Precondition);
        Err(ResizeError::Precondition { message, report })
    }

    fn checkpoint(&mut self) -> Result<(), ResizeError<P::Error>> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    fn transition(&mut self, phase: Phase) {
        info!(instance_id = %self.session.instance_id(), phase = %phase, "entering phase");
        self.session.phase = phase;
        self.persist();
    }

    fn fail(&mut self, cause: FailureKind) -> Box<RecoveryReport> {
        let at = self.session.phase.clone();
        warn!(instance_id = %self.session.instance_id(), phase = %at, cause = %cause, "resize failed");
        self.session.phase = Phase::Failed {
            at: Box::new(at),
            cause,
        };
        self.persist();
        Box::new(self.session.recovery_report())
    }

    fn provider_failed(&mut self, source: P::Error) -> ResizeError<P::Error> {
        let report = self.fail(FailureKind::Provider);
        ResizeError::Provider {
            phase: report.phase.clone(),
            report,
            source,
        }
    }

    fn cancelled(&mut self) -> ResizeError<P::Error> {
        let report = self.fail(FailureKind::Cancelled);
        ResizeError::Cancelled {
            phase: report.phase.clone(),
            report,
        }
    }

    fn wait_failed(&mut self, err: WaitError<P::Error>) -> ResizeError<P::Error> {
        match err {
            WaitError::Timeout {
                last_status,
                waited,
            } => {
                let report = self.fail(FailureKind::Timeout);
                ResizeError::TransitionTimeout {
                    phase: report.phase.clone(),
                    last_status,
                    waited,
                    report,
                }
            }
            WaitError::Provider(source) => self.provider_failed(source),
            WaitError::Cancelled => self.cancelled(),
        }
    }

    fn persist(&self) {
        if let Err(err) = self.orchestrator.store.save(&self.session) {
            warn!(instance_id = %self.session.instance_id(), error = %err, "failed to persist resize session");
        }
    }
}

#[cfg(test)]
mod tests;
