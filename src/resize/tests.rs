//! Unit tests for orchestrator internals: phase guards and persistence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::session_store::SessionStoreError;
use crate::test_support::{FAKE_INSTANCE_ID, FAKE_REGION, FakeProvider, Operation};

const GIB: u64 = 1 << 30;

/// Records every phase it is asked to persist.
#[derive(Clone, Debug, Default)]
struct RecordingStore {
    phases: Arc<Mutex<Vec<Phase>>>,
    fail: bool,
}

impl RecordingStore {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn phases(&self) -> Vec<Phase> {
        self.phases.lock().expect("store lock").clone()
    }
}

impl SessionStore for RecordingStore {
    fn save(&self, session: &ResizeSession) -> Result<(), SessionStoreError> {
        self.phases
            .lock()
            .expect("store lock")
            .push(session.phase.clone());
        if self.fail {
            return Err(SessionStoreError::Serialize {
                message: String::from("disk full"),
            });
        }
        Ok(())
    }

    fn load(&self, _instance_id: &str) -> Result<Option<ResizeSession>, SessionStoreError> {
        Ok(None)
    }
}

#[fixture]
fn fast_policy() -> ResizePolicy {
    ResizePolicy::uniform(Duration::from_millis(2), Duration::from_millis(200))
}

fn request(size: u64) -> ResizeRequest {
    ResizeRequest::new(FAKE_INSTANCE_ID, FAKE_REGION, size)
}

#[rstest]
#[tokio::test]
async fn persists_every_phase_in_order(fast_policy: ResizePolicy) {
    let store = RecordingStore::default();
    let orchestrator = ResizeOrchestrator::new(FakeProvider::running(10 * GIB))
        .with_store(store.clone())
        .with_policy(fast_policy);

    orchestrator
        .resize(request(20 * GIB))
        .await
        .expect("resize should succeed");

    let mut phases = store.phases();
    phases.dedup();
    assert_eq!(
        phases,
        vec![
            Phase::Initialized,
            Phase::Stopping,
            Phase::Stopped,
            Phase::Detaching,
            Phase::Detached,
            Phase::Cloning,
            Phase::Cloned,
            Phase::Attaching,
            Phase::Attached,
            Phase::Starting,
            Phase::Completed,
        ]
    );
}

#[rstest]
#[tokio::test]
async fn store_failures_do_not_abort_the_run(fast_policy: ResizePolicy) {
    let orchestrator = ResizeOrchestrator::new(FakeProvider::running(10 * GIB))
        .with_store(RecordingStore::failing())
        .with_policy(fast_policy);

    let outcome = orchestrator
        .resize(request(20 * GIB))
        .await
        .expect("persistence errors are only logged");

    assert!(outcome.session.is_completed());
}

#[rstest]
#[tokio::test]
async fn detach_refuses_when_instance_not_confirmed_stopped(fast_policy: ResizePolicy) {
    let provider = FakeProvider::running(10 * GIB);
    let orchestrator = ResizeOrchestrator::new(provider.clone()).with_policy(fast_policy);
    let cancel = CancelToken::never();
    let mut run = Run {
        orchestrator: &orchestrator,
        cancel: &cancel,
        session: ResizeSession::new(request(20 * GIB)),
    };
    let instance = run.resolve_instance().await.expect("instance resolves");

    let err = run
        .detach(&instance)
        .await
        .expect_err("detach without a confirmed stop must fail");

    let ResizeError::Precondition { message, report } = err else {
        panic!("expected precondition error, got {err}");
    };
    assert!(message.contains("phase is initialized"), "{message}");
    assert!(report.original_volume_attached());
    assert!(!provider.operations().contains(&Operation::DetachVolume));
    assert!(!provider.operations().contains(&Operation::RootVolume));
}

#[rstest]
#[tokio::test]
async fn start_refuses_without_attached_clone(fast_policy: ResizePolicy) {
    let provider = FakeProvider::running(10 * GIB);
    let orchestrator = ResizeOrchestrator::new(provider.clone()).with_policy(fast_policy);
    let cancel = CancelToken::never();
    let mut run = Run {
        orchestrator: &orchestrator,
        cancel: &cancel,
        session: ResizeSession::new(request(20 * GIB)),
    };
    let instance = run.resolve_instance().await.expect("instance resolves");
    run.session.phase = Phase::Cloned;

    let err = run
        .start(&instance)
        .await
        .expect_err("start before attach must fail");

    assert!(matches!(err, ResizeError::Precondition { .. }), "{err}");
    assert!(!provider.operations().contains(&Operation::StartInstance));
}

#[rstest]
#[tokio::test]
async fn flight_is_released_after_failure(fast_policy: ResizePolicy) {
    let provider = FakeProvider::running(10 * GIB);
    provider.fail_next(Operation::StopInstance, "quota");
    let orchestrator = ResizeOrchestrator::new(provider).with_policy(fast_policy);

    orchestrator
        .resize(request(20 * GIB))
        .await
        .expect_err("stop failure should surface");

    assert!(!orchestrator.flights().is_active(FAKE_INSTANCE_ID));
}
