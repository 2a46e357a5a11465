//! Core library for the rootgrow volume resize tool.
//!
//! The crate grows the root volume of a cloud instance by swapping in a
//! larger clone: stop, detach, clone, attach, start, and finally delete the
//! original. A provider abstraction keeps the workflow independent of the
//! cloud API, and a Scaleway implementation drives the real control plane.
//! After the swap, the guest's partition and filesystem are grown over SSH.

pub mod config;
pub mod guest;
pub mod provider;
pub mod remote;
pub mod resize;
pub mod scaleway;
pub mod session_store;
pub mod test_support;

pub use config::{ConfigError, ScalewayConfig};
pub use guest::GuestFilesystem;
pub use provider::{CloudComputeProvider, Instance, InstanceStatus, Volume, VolumeStatus};
pub use remote::{LoginCredentials, RemoteError, RemoteExecutor, SshConfig, SshExecutor};
pub use resize::{
    CancelHandle, CancelToken, GuestResizeError, OriginalVolumeDisposition, Phase,
    RecoveryReport, ResizeConfig, ResizeError, ResizeOrchestrator, ResizeOutcome, ResizePolicy,
    ResizeRequest, ResizeSession, cancellation,
};
pub use scaleway::{ScalewayProvider, ScalewayProviderError};
pub use session_store::{FileSessionStore, NullSessionStore, SessionStore, SessionStoreError};
