//! Behavioural tests for the root volume resize workflow against the
//! in-memory provider.

use std::time::{Duration, Instant};

use rootgrow::provider::{InstanceStatus, VolumeStatus};
use rootgrow::resize::{
    FailureKind, OriginalVolumeDisposition, OriginalVolumeState, Phase, ResizeError,
    ResizeOrchestrator, ResizePolicy, ResizeRequest, cancellation,
};
use rootgrow::session_store::{FileSessionStore, SessionStore};
use rootgrow::test_support::{
    FAKE_INSTANCE_ID, FAKE_REGION, FAKE_ROOT_VOLUME_ID, FakeError, FakeProvider, Operation,
    ProviderCall,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

const GIB: u64 = 1 << 30;
const CLONE_ID: &str = "vol-root-clone";

#[fixture]
fn provider() -> FakeProvider {
    FakeProvider::running(10 * GIB)
}

#[fixture]
fn fast_policy() -> ResizePolicy {
    ResizePolicy::uniform(Duration::from_millis(2), Duration::from_millis(200))
}

fn request(size: u64) -> ResizeRequest {
    ResizeRequest::new(FAKE_INSTANCE_ID, FAKE_REGION, size)
}

fn fake_orchestrator(
    provider: &FakeProvider,
    policy: ResizePolicy,
) -> ResizeOrchestrator<FakeProvider> {
    ResizeOrchestrator::new(provider.clone()).with_policy(policy)
}

#[rstest]
#[tokio::test]
async fn resize_swaps_root_volume_and_deletes_original(
    provider: FakeProvider,
    fast_policy: ResizePolicy,
) {
    let outcome = fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect("resize should succeed");

    let instance = String::from(FAKE_INSTANCE_ID);
    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::GetInstance(instance.clone()),
            ProviderCall::StopInstance(instance.clone()),
            ProviderCall::InstanceStatus(instance.clone()),
            ProviderCall::RootVolume(instance.clone()),
            ProviderCall::DetachVolume {
                volume: String::from(FAKE_ROOT_VOLUME_ID),
                instance: instance.clone(),
            },
            ProviderCall::VolumeStatus(String::from(FAKE_ROOT_VOLUME_ID)),
            ProviderCall::CloneVolume {
                volume: String::from(FAKE_ROOT_VOLUME_ID),
                size_bytes: 20 * GIB,
            },
            ProviderCall::VolumeStatus(String::from(CLONE_ID)),
            ProviderCall::AttachVolume {
                volume: String::from(CLONE_ID),
                instance: instance.clone(),
                device: String::from("0"),
            },
            ProviderCall::VolumeStatus(String::from(CLONE_ID)),
            ProviderCall::StartInstance(instance.clone()),
            ProviderCall::InstanceStatus(instance),
            ProviderCall::DeleteVolume(String::from(FAKE_ROOT_VOLUME_ID)),
        ]
    );
    assert_eq!(outcome.original_volume, OriginalVolumeDisposition::Deleted);
    assert_eq!(outcome.session.phase, Phase::Completed);
    assert!(outcome.session.original_volume_deleted);
    assert_eq!(
        outcome.session.cloned_volume.map(|volume| volume.size_bytes),
        Some(20 * GIB)
    );
    assert_eq!(provider.root_volume_id().as_deref(), Some(CLONE_ID));
    assert_eq!(provider.volume_ids(), vec![String::from(CLONE_ID)]);
    assert_eq!(provider.instance_status_now(), InstanceStatus::Running);
}

#[rstest]
#[case(5 * GIB)]
#[case(10 * GIB)]
#[tokio::test]
async fn non_growing_size_is_rejected_before_any_change(
    provider: FakeProvider,
    fast_policy: ResizePolicy,
    #[case] size: u64,
) {
    let err = fake_orchestrator(&provider, fast_policy)
        .resize(request(size))
        .await
        .expect_err("size must exceed the current volume");

    let ResizeError::InvalidSize {
        requested,
        current,
        report,
    } = err
    else {
        panic!("expected InvalidSize, got {err}");
    };
    assert_eq!((requested, current), (size, 10 * GIB));
    assert!(report.original_volume_attached());
    assert_eq!(provider.operations(), vec![Operation::GetInstance]);
    assert_eq!(provider.instance_status_now(), InstanceStatus::Running);
}

#[rstest]
#[tokio::test]
async fn size_is_checked_after_lookup_when_not_reported(fast_policy: ResizePolicy) {
    let provider = FakeProvider::running(10 * GIB).without_root_size();

    let err = fake_orchestrator(&provider, fast_policy)
        .resize(request(8 * GIB))
        .await
        .expect_err("shrinking must be refused");

    assert!(matches!(err, ResizeError::InvalidSize { .. }), "{err}");
    assert_eq!(
        provider.operations(),
        vec![
            Operation::GetInstance,
            Operation::StopInstance,
            Operation::InstanceStatus,
            Operation::RootVolume,
        ]
    );
    let report = err.recovery().expect("report expected");
    assert_eq!(report.original_volume, OriginalVolumeState::AttachedToInstance);
    assert_eq!(
        provider.volume_status_now(FAKE_ROOT_VOLUME_ID),
        Some(VolumeStatus::InUse {
            instance_id: String::from(FAKE_INSTANCE_ID)
        })
    );
}

#[rstest]
#[tokio::test]
async fn stopped_instance_skips_stop_and_wait(fast_policy: ResizePolicy) {
    let provider = FakeProvider::running(10 * GIB).with_instance_status(InstanceStatus::Stopped);

    fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect("resize should succeed");

    let operations = provider.operations();
    assert!(!operations.contains(&Operation::StopInstance));
    assert_eq!(
        operations.get(..2),
        Some([Operation::GetInstance, Operation::RootVolume].as_slice())
    );
}

#[rstest]
#[tokio::test]
async fn transitioning_instance_is_waited_on_without_stop_call(fast_policy: ResizePolicy) {
    let provider = FakeProvider::running(10 * GIB)
        .with_instance_status(InstanceStatus::Transitioning(String::from("stopping")));
    provider.queue_instance_statuses([
        Ok(InstanceStatus::Transitioning(String::from("stopping"))),
        Ok(InstanceStatus::Stopped),
    ]);

    fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect("resize should succeed");

    let operations = provider.operations();
    assert!(!operations.contains(&Operation::StopInstance));
    assert_eq!(
        operations.get(..4),
        Some(
            [
                Operation::GetInstance,
                Operation::InstanceStatus,
                Operation::InstanceStatus,
                Operation::RootVolume,
            ]
            .as_slice()
        )
    );
}

#[rstest]
#[tokio::test]
async fn keep_original_volume_skips_delete(provider: FakeProvider, fast_policy: ResizePolicy) {
    let outcome = fake_orchestrator(&provider, fast_policy.with_keep_original_volume(true))
        .resize(request(20 * GIB))
        .await
        .expect("resize should succeed");

    assert!(matches!(
        outcome.original_volume,
        OriginalVolumeDisposition::Retained { .. }
    ));
    assert!(!provider.operations().contains(&Operation::DeleteVolume));
    assert_eq!(
        provider.volume_ids(),
        vec![String::from(FAKE_ROOT_VOLUME_ID), String::from(CLONE_ID)]
    );
    assert_eq!(
        provider.volume_status_now(FAKE_ROOT_VOLUME_ID),
        Some(VolumeStatus::Available)
    );
}

#[rstest]
#[tokio::test]
async fn failed_delete_still_completes(provider: FakeProvider, fast_policy: ResizePolicy) {
    provider.fail_next(Operation::DeleteVolume, "volume locked");

    let outcome = fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect("a failed delete does not fail the resize");

    let OriginalVolumeDisposition::Retained { reason } = &outcome.original_volume else {
        panic!("original volume should be retained");
    };
    assert!(reason.contains("volume locked"), "{reason}");
    assert!(outcome.session.is_completed());
    assert!(!outcome.session.original_volume_deleted);
    assert!(provider.volume_ids().contains(&String::from(FAKE_ROOT_VOLUME_ID)));
}

#[rstest]
#[tokio::test]
async fn attach_failure_removes_unattached_clone(
    provider: FakeProvider,
    fast_policy: ResizePolicy,
) {
    provider.fail_next(Operation::AttachVolume, "slot busy");

    let err = fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("attach failure should surface");

    let ResizeError::Provider {
        phase,
        report,
        source,
    } = err
    else {
        panic!("expected provider error, got {err}");
    };
    assert_eq!(phase, Phase::Attaching);
    assert_eq!(source, FakeError(String::from("slot busy")));
    assert!(report.cloned_volume_removed);
    assert_eq!(report.original_volume, OriginalVolumeState::DetachedIntact);
    assert_eq!(provider.volume_ids(), vec![String::from(FAKE_ROOT_VOLUME_ID)]);
    assert!(!provider.operations().contains(&Operation::StartInstance));
}

#[rstest]
#[tokio::test]
async fn start_failure_keeps_both_volumes(provider: FakeProvider, fast_policy: ResizePolicy) {
    provider.fail_next(Operation::StartInstance, "capacity");

    let err = fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("start failure should surface");

    assert!(
        matches!(err, ResizeError::Provider { phase: Phase::Starting, .. }),
        "{err}"
    );
    let report = err.recovery().expect("report expected");
    assert!(report.original_volume_exists());
    assert_eq!(report.cloned_volume_id.as_deref(), Some(CLONE_ID));
    assert!(!report.cloned_volume_removed);
    assert!(!provider.operations().contains(&Operation::DeleteVolume));
    assert_eq!(provider.volume_ids().len(), 2);
}

#[rstest]
#[tokio::test]
async fn concurrent_resize_for_same_instance_conflicts(
    provider: FakeProvider,
    fast_policy: ResizePolicy,
) {
    let orchestrator = fake_orchestrator(&provider, fast_policy);
    let _active = orchestrator
        .flights()
        .try_acquire(FAKE_INSTANCE_ID)
        .expect("first claim succeeds");

    let err = orchestrator
        .resize(request(20 * GIB))
        .await
        .expect_err("second resize must be refused");

    assert!(
        matches!(err, ResizeError::Conflict { ref instance_id } if instance_id == FAKE_INSTANCE_ID),
        "{err}"
    );
    assert!(provider.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn stop_timeout_reports_last_status(provider: FakeProvider) {
    provider.pin_instance_status(InstanceStatus::Transitioning(String::from("stopping")));
    let policy = ResizePolicy::uniform(Duration::from_millis(2), Duration::from_millis(30));

    let err = fake_orchestrator(&provider, policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("stop never converges");

    let ResizeError::TransitionTimeout {
        phase,
        last_status,
        report,
        ..
    } = err
    else {
        panic!("expected timeout, got {err}");
    };
    assert_eq!(phase, Phase::Stopping);
    assert!(last_status.contains("stopping"), "{last_status}");
    assert!(report.original_volume_attached());
    assert!(!provider.operations().contains(&Operation::DetachVolume));
}

#[rstest]
#[tokio::test]
async fn clone_timeout_leaves_original_detached_and_intact(provider: FakeProvider) {
    provider.pin_volume_status(CLONE_ID, VolumeStatus::Transitioning(String::from("creating")));
    let policy = ResizePolicy::uniform(Duration::from_millis(2), Duration::from_millis(30));

    let err = fake_orchestrator(&provider, policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("clone never becomes available");

    assert!(
        matches!(err, ResizeError::TransitionTimeout { phase: Phase::Cloning, .. }),
        "{err}"
    );
    let report = err.recovery().expect("report expected");
    assert_eq!(report.original_volume, OriginalVolumeState::DetachedIntact);
    assert_eq!(report.cloned_volume_id.as_deref(), Some(CLONE_ID));
    assert!(!provider.operations().contains(&Operation::AttachVolume));
}

#[rstest]
#[tokio::test]
async fn transient_poll_errors_are_absorbed(provider: FakeProvider, fast_policy: ResizePolicy) {
    provider.queue_instance_statuses([
        Err(FakeError(String::from("503"))),
        Err(FakeError(String::from("503"))),
    ]);

    let outcome = fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect("transient errors within tolerance are retried");

    assert!(outcome.session.is_completed());
}

#[rstest]
#[tokio::test]
async fn persistent_poll_errors_surface(provider: FakeProvider) {
    provider.queue_instance_statuses((0..3).map(|_| Err(FakeError(String::from("503")))));
    let policy = ResizePolicy::uniform(Duration::from_millis(2), Duration::from_millis(200))
        .with_error_tolerance(2);

    let err = fake_orchestrator(&provider, policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("errors beyond tolerance surface");

    assert!(
        matches!(err, ResizeError::Provider { phase: Phase::Stopping, .. }),
        "{err}"
    );
}

#[rstest]
#[tokio::test]
async fn cancellation_interrupts_a_wait(provider: FakeProvider) {
    provider.pin_instance_status(InstanceStatus::Transitioning(String::from("stopping")));
    let policy = ResizePolicy::uniform(Duration::from_millis(10), Duration::from_secs(30));
    let orchestrator = fake_orchestrator(&provider, policy);
    let (handle, token) = cancellation();
    let started = Instant::now();

    let (result, ()) = tokio::join!(
        orchestrator.resize_with_cancel(request(20 * GIB), &token),
        async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            handle.cancel();
        }
    );

    let err = result.expect_err("cancelled run should fail");
    assert!(
        matches!(err, ResizeError::Cancelled { phase: Phase::Stopping, .. }),
        "{err}"
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!orchestrator.flights().is_active(FAKE_INSTANCE_ID));
}

#[rstest]
#[tokio::test]
async fn cancellation_before_start_changes_nothing(
    provider: FakeProvider,
    fast_policy: ResizePolicy,
) {
    let (handle, token) = cancellation();
    handle.cancel();

    let err = fake_orchestrator(&provider, fast_policy)
        .resize_with_cancel(request(20 * GIB), &token)
        .await
        .expect_err("cancelled run should fail");

    assert!(
        matches!(err, ResizeError::Cancelled { phase: Phase::Initialized, .. }),
        "{err}"
    );
    assert!(provider.operations().is_empty(), "{:?}", provider.operations());
}

#[rstest]
#[tokio::test]
async fn unanswered_status_poll_ends_in_timeout(provider: FakeProvider) {
    provider.hang(Operation::InstanceStatus);
    let policy = ResizePolicy::uniform(Duration::from_millis(5), Duration::from_millis(50));
    let started = Instant::now();

    let err = fake_orchestrator(&provider, policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("a status poll that never answers must time out");

    assert!(
        matches!(err, ResizeError::TransitionTimeout { phase: Phase::Stopping, .. }),
        "{err}"
    );
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    let report = err.recovery().expect("report expected");
    assert_eq!(report.original_volume, OriginalVolumeState::AttachedToInstance);
}

#[rstest]
#[case::status_poll(Operation::InstanceStatus)]
#[case::stop_request(Operation::StopInstance)]
#[tokio::test]
async fn cancellation_interrupts_an_unanswered_call(
    provider: FakeProvider,
    #[case] unanswered: Operation,
) {
    provider.hang(unanswered);
    let policy = ResizePolicy::uniform(Duration::from_millis(5), Duration::from_secs(30));
    let orchestrator = fake_orchestrator(&provider, policy);
    let (handle, token) = cancellation();
    let started = Instant::now();

    let (result, ()) = tokio::join!(
        orchestrator.resize_with_cancel(request(20 * GIB), &token),
        async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            handle.cancel();
        }
    );

    let err = result.expect_err("cancelled run should fail");
    assert!(
        matches!(err, ResizeError::Cancelled { phase: Phase::Stopping, .. }),
        "{err}"
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!orchestrator.flights().is_active(FAKE_INSTANCE_ID));
    assert!(!provider.operations().contains(&Operation::DetachVolume));
}

#[rstest]
#[tokio::test]
async fn missing_instance_is_reported_without_changes(fast_policy: ResizePolicy) {
    let provider = FakeProvider::without_instance();

    let err = fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("unknown instance");

    assert!(matches!(err, ResizeError::InstanceNotFound { .. }), "{err}");
    assert!(err.recovery().is_none());
    assert_eq!(provider.operations(), vec![Operation::GetInstance]);
}

#[rstest]
#[tokio::test]
async fn missing_root_volume_is_reported_after_stop(fast_policy: ResizePolicy) {
    let provider = FakeProvider::running(10 * GIB).without_root_volume();

    let err = fake_orchestrator(&provider, fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("no root volume");

    assert!(matches!(err, ResizeError::RootVolumeNotFound { .. }), "{err}");
    assert!(!provider.operations().contains(&Operation::DetachVolume));
}

#[rstest]
#[tokio::test]
async fn invalid_request_makes_no_calls(provider: FakeProvider, fast_policy: ResizePolicy) {
    let err = fake_orchestrator(&provider, fast_policy)
        .resize(ResizeRequest::new("  ", FAKE_REGION, 20 * GIB))
        .await
        .expect_err("blank instance id");

    assert!(matches!(err, ResizeError::InvalidRequest(_)), "{err}");
    assert!(provider.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn file_store_records_final_session(provider: FakeProvider, fast_policy: ResizePolicy) {
    let temp = TempDir::new().expect("temp dir");
    let root = camino::Utf8PathBuf::from_path_buf(temp.path().join("sessions"))
        .expect("utf8 temp path");
    let store = FileSessionStore::new(root);
    let orchestrator = ResizeOrchestrator::new(provider.clone())
        .with_store(store.clone())
        .with_policy(fast_policy);

    orchestrator
        .resize(request(20 * GIB))
        .await
        .expect("resize should succeed");

    let session = store
        .load(FAKE_INSTANCE_ID)
        .expect("load should succeed")
        .expect("session should be recorded");
    assert_eq!(session.phase, Phase::Completed);
    assert!(session.original_volume_deleted);
}

#[rstest]
#[tokio::test]
async fn failed_session_is_recorded_with_cause(provider: FakeProvider, fast_policy: ResizePolicy) {
    let temp = TempDir::new().expect("temp dir");
    let root = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .expect("utf8 temp path");
    let store = FileSessionStore::new(root);
    provider.fail_next(Operation::CloneVolume, "quota exceeded");

    ResizeOrchestrator::new(provider.clone())
        .with_store(store.clone())
        .with_policy(fast_policy)
        .resize(request(20 * GIB))
        .await
        .expect_err("clone failure should surface");

    let session = store
        .load(FAKE_INSTANCE_ID)
        .expect("load should succeed")
        .expect("session should be recorded");
    assert_eq!(
        session.phase,
        Phase::Failed {
            at: Box::new(Phase::Cloning),
            cause: FailureKind::Provider,
        }
    );
    assert_eq!(
        session.recovery_report().original_volume,
        OriginalVolumeState::DetachedIntact
    );
}
