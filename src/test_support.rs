//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::provider::{
    CloudComputeProvider, Instance, InstanceStatus, ProviderFuture, Volume, VolumeStatus,
};
use crate::remote::{CommandOutput, CommandRunner, RemoteError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<CommandOutput>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Error returned by [`FakeProvider`] when a failure was injected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake provider failure: {0}")]
pub struct FakeError(pub String);

/// Provider operation kinds, used to inject failures and assert ordering.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// [`CloudComputeProvider::get_instance`].
    GetInstance,
    /// [`CloudComputeProvider::stop_instance`].
    StopInstance,
    /// [`CloudComputeProvider::start_instance`].
    StartInstance,
    /// [`CloudComputeProvider::instance_status`].
    InstanceStatus,
    /// [`CloudComputeProvider::root_volume`].
    RootVolume,
    /// [`CloudComputeProvider::detach_volume`].
    DetachVolume,
    /// [`CloudComputeProvider::clone_volume`].
    CloneVolume,
    /// [`CloudComputeProvider::attach_volume`].
    AttachVolume,
    /// [`CloudComputeProvider::volume_status`].
    VolumeStatus,
    /// [`CloudComputeProvider::delete_volume`].
    DeleteVolume,
}

/// A recorded provider call with the identifiers it targeted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// Instance lookup.
    GetInstance(String),
    /// Power-off request.
    StopInstance(String),
    /// Power-on request.
    StartInstance(String),
    /// Instance status observation.
    InstanceStatus(String),
    /// Root volume lookup.
    RootVolume(String),
    /// Detach request for a volume.
    DetachVolume {
        /// Volume detached.
        volume: String,
        /// Instance it was detached from.
        instance: String,
    },
    /// Clone request.
    CloneVolume {
        /// Source volume.
        volume: String,
        /// Requested size.
        size_bytes: u64,
    },
    /// Attach request.
    AttachVolume {
        /// Volume attached.
        volume: String,
        /// Target instance.
        instance: String,
        /// Device slot.
        device: String,
    },
    /// Volume status observation.
    VolumeStatus(String),
    /// Delete request.
    DeleteVolume(String),
}

impl ProviderCall {
    /// Operation kind of this call.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::GetInstance(_) => Operation::GetInstance,
            Self::StopInstance(_) => Operation::StopInstance,
            Self::StartInstance(_) => Operation::StartInstance,
            Self::InstanceStatus(_) => Operation::InstanceStatus,
            Self::RootVolume(_) => Operation::RootVolume,
            Self::DetachVolume { .. } => Operation::DetachVolume,
            Self::CloneVolume { .. } => Operation::CloneVolume,
            Self::AttachVolume { .. } => Operation::AttachVolume,
            Self::VolumeStatus(_) => Operation::VolumeStatus,
            Self::DeleteVolume(_) => Operation::DeleteVolume,
        }
    }
}

#[derive(Debug)]
struct FakeState {
    instance: Option<Instance>,
    instance_status: InstanceStatus,
    root_volume_id: Option<String>,
    report_root_size: bool,
    volumes: BTreeMap<String, (Volume, VolumeStatus)>,
    instance_observations: VecDeque<Result<InstanceStatus, FakeError>>,
    volume_observations: HashMap<String, VecDeque<Result<VolumeStatus, FakeError>>>,
    pinned_instance_status: Option<InstanceStatus>,
    pinned_volume_status: HashMap<String, VolumeStatus>,
    failures: HashMap<Operation, VecDeque<FakeError>>,
    hung: HashSet<Operation>,
    calls: Vec<ProviderCall>,
}

impl FakeState {
    fn record(&mut self, call: ProviderCall) -> Result<(), FakeError> {
        let operation = call.operation();
        self.calls.push(call);
        match self.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_volume_status(&mut self, volume_id: &str, status: VolumeStatus) -> Result<(), FakeError> {
        let (_, current) = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| FakeError(format!("volume {volume_id} does not exist")))?;
        *current = status;
        Ok(())
    }
}

/// In-memory provider that simulates instance and volume state.
///
/// Operations mutate the simulated state immediately; observations return
/// queued or pinned statuses first so tests can script transitional states,
/// transient errors, and transitions that never converge.
#[derive(Clone, Debug)]
pub struct FakeProvider {
    state: Arc<StdMutex<FakeState>>,
}

/// Instance identifier used by [`FakeProvider::running`].
pub const FAKE_INSTANCE_ID: &str = "i-fake";
/// Region used by [`FakeProvider::running`].
pub const FAKE_REGION: &str = "fr-par-1";
/// Root volume identifier used by [`FakeProvider::running`].
pub const FAKE_ROOT_VOLUME_ID: &str = "vol-root";

impl FakeProvider {
    /// Creates a provider holding `instance` with `root_volume` in its boot
    /// slot.
    #[must_use]
    pub fn new(instance: Instance, root_volume: Volume) -> Self {
        let mut volumes = BTreeMap::new();
        let root_volume_id = root_volume.id.clone();
        volumes.insert(
            root_volume_id.clone(),
            (
                root_volume,
                VolumeStatus::InUse {
                    instance_id: instance.id.clone(),
                },
            ),
        );
        Self::from_state(FakeState {
            instance_status: instance.status.clone(),
            instance: Some(instance),
            root_volume_id: Some(root_volume_id),
            report_root_size: true,
            volumes,
            instance_observations: VecDeque::new(),
            volume_observations: HashMap::new(),
            pinned_instance_status: None,
            pinned_volume_status: HashMap::new(),
            failures: HashMap::new(),
            hung: HashSet::new(),
            calls: Vec::new(),
        })
    }

    /// Creates a running instance [`FAKE_INSTANCE_ID`] in [`FAKE_REGION`]
    /// whose root volume holds `size_bytes`.
    #[must_use]
    pub fn running(size_bytes: u64) -> Self {
        let instance = Instance {
            id: String::from(FAKE_INSTANCE_ID),
            region: String::from(FAKE_REGION),
            status: InstanceStatus::Running,
            public_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            root_volume_size: None,
        };
        let root = Volume {
            id: String::from(FAKE_ROOT_VOLUME_ID),
            region: String::from(FAKE_REGION),
            size_bytes,
            device: String::from("0"),
        };
        Self::new(instance, root)
    }

    /// Creates a provider that knows no instances.
    #[must_use]
    pub fn without_instance() -> Self {
        Self::from_state(FakeState {
            instance: None,
            instance_status: InstanceStatus::Stopped,
            root_volume_id: None,
            report_root_size: false,
            volumes: BTreeMap::new(),
            instance_observations: VecDeque::new(),
            volume_observations: HashMap::new(),
            pinned_instance_status: None,
            pinned_volume_status: HashMap::new(),
            failures: HashMap::new(),
            hung: HashSet::new(),
            calls: Vec::new(),
        })
    }

    fn from_state(state: FakeState) -> Self {
        Self {
            state: Arc::new(StdMutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops reporting the root volume size on instance lookup.
    #[must_use]
    pub fn without_root_size(self) -> Self {
        self.lock().report_root_size = false;
        self
    }

    /// Overrides the instance's current power state.
    #[must_use]
    pub fn with_instance_status(self, status: InstanceStatus) -> Self {
        self.lock().instance_status = status;
        self
    }

    /// Overrides the instance's public address.
    #[must_use]
    pub fn with_public_address(self, address: Option<IpAddr>) -> Self {
        if let Some(instance) = self.lock().instance.as_mut() {
            instance.public_address = address;
        }
        self
    }

    /// Removes the root volume from the instance's boot slot.
    #[must_use]
    pub fn without_root_volume(self) -> Self {
        {
            let mut state = self.lock();
            if let Some(id) = state.root_volume_id.take() {
                state.volumes.remove(&id);
            }
        }
        self
    }

    /// Makes the next call of `operation` fail with `message`.
    pub fn fail_next(&self, operation: Operation, message: &str) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(FakeError(message.to_owned()));
    }

    /// Makes every later call of `operation` wait forever without being
    /// recorded, as a provider that never answers would.
    pub fn hang(&self, operation: Operation) {
        self.lock().hung.insert(operation);
    }

    fn respond<'a, T: Send + 'a>(
        &'a self,
        operation: Operation,
        reply: impl Future<Output = Result<T, FakeError>> + Send + 'a,
    ) -> ProviderFuture<'a, T, FakeError> {
        Box::pin(async move {
            let hung = self.lock().hung.contains(&operation);
            if hung {
                std::future::pending::<()>().await;
            }
            reply.await
        })
    }

    /// Queues instance status observations returned before the simulated
    /// state. A queued `Running` or `Stopped` also becomes the simulated
    /// state when observed.
    pub fn queue_instance_statuses(
        &self,
        observations: impl IntoIterator<Item = Result<InstanceStatus, FakeError>>,
    ) {
        self.lock().instance_observations.extend(observations);
    }

    /// Queues status observations for `volume_id`.
    pub fn queue_volume_statuses(
        &self,
        volume_id: &str,
        observations: impl IntoIterator<Item = Result<VolumeStatus, FakeError>>,
    ) {
        self.lock()
            .volume_observations
            .entry(volume_id.to_owned())
            .or_default()
            .extend(observations);
    }

    /// Reports `status` for every instance observation once queued ones run
    /// out.
    pub fn pin_instance_status(&self, status: InstanceStatus) {
        self.lock().pinned_instance_status = Some(status);
    }

    /// Reports `status` for every observation of `volume_id` once queued ones
    /// run out.
    pub fn pin_volume_status(&self, volume_id: &str, status: VolumeStatus) {
        self.lock()
            .pinned_volume_status
            .insert(volume_id.to_owned(), status);
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Returns the operation kinds recorded so far.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().calls.iter().map(ProviderCall::operation).collect()
    }

    /// Simulated power state.
    #[must_use]
    pub fn instance_status_now(&self) -> InstanceStatus {
        self.lock().instance_status.clone()
    }

    /// Volume currently in the boot slot.
    #[must_use]
    pub fn root_volume_id(&self) -> Option<String> {
        self.lock().root_volume_id.clone()
    }

    /// Simulated status of `volume_id`, or `None` once deleted.
    #[must_use]
    pub fn volume_status_now(&self, volume_id: &str) -> Option<VolumeStatus> {
        self.lock()
            .volumes
            .get(volume_id)
            .map(|(_, status)| status.clone())
    }

    /// Identifiers of every existing volume.
    #[must_use]
    pub fn volume_ids(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }
}

impl CloudComputeProvider for FakeProvider {
    type Error = FakeError;

    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a str,
    ) -> ProviderFuture<'a, Option<Instance>, Self::Error> {
        self.respond(Operation::GetInstance, async move {
            let mut state = self.lock();
            state.record(ProviderCall::GetInstance(instance_id.to_owned()))?;
            let Some(found) = state.instance.clone() else {
                return Ok(None);
            };
            if found.id != instance_id || found.region != region {
                return Ok(None);
            }
            let root_volume_size = if state.report_root_size {
                state
                    .root_volume_id
                    .as_ref()
                    .and_then(|id| state.volumes.get(id))
                    .map(|(volume, _)| volume.size_bytes)
            } else {
                None
            };
            Ok(Some(Instance {
                status: state.instance_status.clone(),
                root_volume_size,
                ..found
            }))
        })
    }

    fn stop_instance<'a>(&'a self, instance: &'a Instance) -> ProviderFuture<'a, (), Self::Error> {
        self.respond(Operation::StopInstance, async move {
            let mut state = self.lock();
            state.record(ProviderCall::StopInstance(instance.id.clone()))?;
            state.instance_status = InstanceStatus::Stopped;
            Ok(())
        })
    }

    fn start_instance<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, (), Self::Error> {
        self.respond(Operation::StartInstance, async move {
            let mut state = self.lock();
            state.record(ProviderCall::StartInstance(instance.id.clone()))?;
            if state.root_volume_id.is_none() {
                return Err(FakeError(String::from("instance has no root volume")));
            }
            state.instance_status = InstanceStatus::Running;
            Ok(())
        })
    }

    fn instance_status<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        self.respond(Operation::InstanceStatus, async move {
            let mut state = self.lock();
            state.record(ProviderCall::InstanceStatus(instance.id.clone()))?;
            if let Some(observation) = state.instance_observations.pop_front() {
                // Settled observations become the simulated state.
                if let Ok(settled @ (InstanceStatus::Running | InstanceStatus::Stopped)) =
                    &observation
                {
                    state.instance_status = settled.clone();
                }
                return observation;
            }
            Ok(state
                .pinned_instance_status
                .clone()
                .unwrap_or_else(|| state.instance_status.clone()))
        })
    }

    fn root_volume<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, Option<Volume>, Self::Error> {
        self.respond(Operation::RootVolume, async move {
            let mut state = self.lock();
            state.record(ProviderCall::RootVolume(instance.id.clone()))?;
            Ok(state
                .root_volume_id
                .as_ref()
                .and_then(|id| state.volumes.get(id))
                .map(|(volume, _)| volume.clone()))
        })
    }

    fn detach_volume<'a>(
        &'a self,
        volume: &'a Volume,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, (), Self::Error> {
        self.respond(Operation::DetachVolume, async move {
            let mut state = self.lock();
            state.record(ProviderCall::DetachVolume {
                volume: volume.id.clone(),
                instance: instance.id.clone(),
            })?;
            if state.instance_status != InstanceStatus::Stopped {
                return Err(FakeError(String::from("instance must be stopped")));
            }
            state.set_volume_status(&volume.id, VolumeStatus::Available)?;
            if state.root_volume_id.as_deref() == Some(volume.id.as_str()) {
                state.root_volume_id = None;
            }
            Ok(())
        })
    }

    fn clone_volume<'a>(
        &'a self,
        volume: &'a Volume,
        size_bytes: u64,
    ) -> ProviderFuture<'a, Volume, Self::Error> {
        self.respond(Operation::CloneVolume, async move {
            let mut state = self.lock();
            state.record(ProviderCall::CloneVolume {
                volume: volume.id.clone(),
                size_bytes,
            })?;
            let clone = Volume {
                id: format!("{}-clone", volume.id),
                region: volume.region.clone(),
                size_bytes,
                device: volume.device.clone(),
            };
            state
                .volumes
                .insert(clone.id.clone(), (clone.clone(), VolumeStatus::Available));
            Ok(clone)
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume: &'a Volume,
        instance: &'a Instance,
        device: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        self.respond(Operation::AttachVolume, async move {
            let mut state = self.lock();
            state.record(ProviderCall::AttachVolume {
                volume: volume.id.clone(),
                instance: instance.id.clone(),
                device: device.to_owned(),
            })?;
            state.set_volume_status(
                &volume.id,
                VolumeStatus::InUse {
                    instance_id: instance.id.clone(),
                },
            )?;
            state.root_volume_id = Some(volume.id.clone());
            Ok(())
        })
    }

    fn volume_status<'a>(
        &'a self,
        volume: &'a Volume,
    ) -> ProviderFuture<'a, VolumeStatus, Self::Error> {
        self.respond(Operation::VolumeStatus, async move {
            let mut state = self.lock();
            state.record(ProviderCall::VolumeStatus(volume.id.clone()))?;
            if let Some(observation) = state
                .volume_observations
                .get_mut(&volume.id)
                .and_then(VecDeque::pop_front)
            {
                return observation;
            }
            if let Some(pinned) = state.pinned_volume_status.get(&volume.id) {
                return Ok(pinned.clone());
            }
            state
                .volumes
                .get(&volume.id)
                .map(|(_, status)| status.clone())
                .ok_or_else(|| FakeError(format!("volume {} does not exist", volume.id)))
        })
    }

    fn delete_volume<'a>(&'a self, volume: &'a Volume) -> ProviderFuture<'a, (), Self::Error> {
        self.respond(Operation::DeleteVolume, async move {
            let mut state = self.lock();
            state.record(ProviderCall::DeleteVolume(volume.id.clone()))?;
            let attached = match state.volumes.get(&volume.id) {
                Some((_, status)) => matches!(status, VolumeStatus::InUse { .. }),
                None => return Err(FakeError(format!("volume {} does not exist", volume.id))),
            };
            if attached {
                return Err(FakeError(format!("volume {} is attached", volume.id)));
            }
            state.volumes.remove(&volume.id);
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
