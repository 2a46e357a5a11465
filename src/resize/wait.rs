//! Fixed-interval polling for provider state convergence.
//!
//! Provider-side state changes here are short-lived, so a fixed interval
//! bounded by a per-transition deadline and an attempt cap is sufficient.
//! Every wait observes a [`CancelToken`]; cancelling abandons the wait but
//! never the provider operation that preceded it.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Consecutive failed observations absorbed before a wait gives up.
pub const DEFAULT_POLL_ERROR_TOLERANCE: u32 = 3;

/// Interval, deadline, and error budget for one state transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between observations.
    pub interval: Duration,
    /// Overall deadline for the transition.
    pub timeout: Duration,
    /// Consecutive observation failures retried transparently.
    pub error_tolerance: u32,
}

impl PollPolicy {
    /// Creates a policy with the default error tolerance.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            error_tolerance: DEFAULT_POLL_ERROR_TOLERANCE,
        }
    }

    /// Overrides the number of consecutive observation failures tolerated.
    #[must_use]
    pub const fn with_error_tolerance(mut self, tolerance: u32) -> Self {
        self.error_tolerance = tolerance;
        self
    }

    /// Upper bound on observations, derived from the deadline and interval.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let interval_ms = self.interval.as_millis().max(1);
        let slots = self
            .timeout
            .as_millis()
            .checked_div(interval_ms)
            .unwrap_or_default();
        u32::try_from(slots)
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }
}

/// Why a wait ended without convergence.
#[derive(Debug)]
pub(crate) enum WaitError<E> {
    /// The deadline or attempt cap was reached.
    Timeout {
        last_status: String,
        waited: Duration,
    },
    /// Observations kept failing beyond the tolerance.
    Provider(E),
    /// The caller cancelled.
    Cancelled,
}

impl<E: Display> Display for WaitError<E> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout {
                last_status,
                waited,
            } => write!(formatter, "gave up after {waited:?} (last status: {last_status})"),
            Self::Provider(err) => write!(formatter, "{err}"),
            Self::Cancelled => formatter.write_str("cancelled"),
        }
    }
}

/// Creates a linked cancellation handle and token.
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelToken { receiver })
}

/// Caller side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation of every wait observing the linked token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Workflow side of a cancellation pair.
#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns a token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when cancellation is requested; pends forever when the handle
    /// was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let closed = receiver.wait_for(|cancelled| *cancelled).await.map(|_| ()).is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Polls `observe` until `converged` accepts an observation.
///
/// The first observation happens immediately. Observation errors are retried
/// up to the policy's tolerance of consecutive failures. An observation that
/// does not resolve before the deadline ends the wait with a timeout, and
/// cancellation interrupts an in-flight observation.
pub(crate) async fn poll_until<T, E, F, Fut, C>(
    policy: &PollPolicy,
    cancel: &CancelToken,
    resource: &str,
    mut observe: F,
    mut converged: C,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&T) -> bool,
    T: Display,
    E: Display,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let max_attempts = policy.max_attempts();
    let mut attempts: u32 = 0;
    let mut consecutive_errors: u32 = 0;
    let mut last_status: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        attempts = attempts.saturating_add(1);
        let budget = deadline.saturating_duration_since(Instant::now());
        let observed = tokio::select! {
            outcome = timeout(budget, observe()) => outcome,
            () = cancel.cancelled() => return Err(WaitError::Cancelled),
        };
        let Ok(result) = observed else {
            warn!(resource, attempt = attempts, "status observation did not return before the deadline");
            return Err(timed_out(last_status, started));
        };

        match result {
            Ok(observation) => {
                consecutive_errors = 0;
                debug!(resource, status = %observation, attempt = attempts, "observed status");
                if converged(&observation) {
                    return Ok(observation);
                }
                last_status = Some(observation.to_string());
            }
            Err(err) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors > policy.error_tolerance {
                    return Err(WaitError::Provider(err));
                }
                warn!(resource, error = %err, attempt = attempts, "status poll failed; retrying");
                last_status = Some(format!("poll error: {err}"));
            }
        }

        let now = Instant::now();
        if attempts >= max_attempts || now >= deadline {
            return Err(timed_out(last_status, started));
        }

        let pause = policy.interval.min(deadline.saturating_duration_since(now));
        tokio::select! {
            () = sleep(pause) => {}
            () = cancel.cancelled() => return Err(WaitError::Cancelled),
        }
    }
}

/// Awaits a single provider request, abandoning it when the policy deadline
/// passes or `cancel` fires.
///
/// Abandoning only stops waiting for the reply; a request the provider
/// already accepted keeps running on its side.
pub(crate) async fn bounded<T, E, Fut>(
    policy: &PollPolicy,
    cancel: &CancelToken,
    request: &str,
    call: Fut,
) -> Result<T, WaitError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    if cancel.is_cancelled() {
        return Err(WaitError::Cancelled);
    }

    let started = Instant::now();
    let outcome = tokio::select! {
        outcome = timeout(policy.timeout, call) => outcome,
        () = cancel.cancelled() => return Err(WaitError::Cancelled),
    };
    match outcome {
        Ok(result) => result.map_err(WaitError::Provider),
        Err(_) => {
            warn!(request, "provider request did not return before the deadline");
            Err(timed_out(
                Some(format!("{request} request unanswered")),
                started,
            ))
        }
    }
}

fn timed_out<E>(last_status: Option<String>, started: Instant) -> WaitError<E> {
    WaitError::Timeout {
        last_status: last_status.unwrap_or_else(|| String::from("<not observed>")),
        waited: started.elapsed(),
    }
}
