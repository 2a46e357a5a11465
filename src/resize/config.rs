//! Resize timing and behaviour settings.
//!
//! [`ResizeConfig`] is the layered, user-facing form loaded via
//! `ortho-config`; [`ResizePolicy`] is the validated form the orchestrator
//! consumes.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;
use crate::guest::GuestFilesystem;

use super::wait::{DEFAULT_POLL_ERROR_TOLERANCE, PollPolicy};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_DETACH_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(900);
const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_SETTLE_DELAY_SECS: u64 = 25;

/// Default directory for persisted sessions, relative to the working
/// directory.
pub const DEFAULT_STATE_DIR: &str = ".rootgrow/sessions";

/// Resize settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ROOTGROW",
    discovery(
        app_name = "rootgrow",
        env_var = "ROOTGROW_CONFIG_PATH",
        config_file_name = "rootgrow.toml",
        dotfile_name = ".rootgrow.toml",
        project_file_name = "rootgrow.toml"
    )
)]
pub struct ResizeConfig {
    /// Seconds between status observations.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Deadline for the instance to stop.
    #[ortho_config(default = 300)]
    pub stop_timeout_secs: u64,
    /// Deadline for the original volume to detach.
    #[ortho_config(default = 120)]
    pub detach_timeout_secs: u64,
    /// Deadline for the clone to become available.
    #[ortho_config(default = 900)]
    pub clone_timeout_secs: u64,
    /// Deadline for the clone to show as attached.
    #[ortho_config(default = 120)]
    pub attach_timeout_secs: u64,
    /// Deadline for the instance to run again.
    #[ortho_config(default = 300)]
    pub start_timeout_secs: u64,
    /// Consecutive failed observations retried before giving up.
    #[ortho_config(default = DEFAULT_POLL_ERROR_TOLERANCE)]
    pub poll_error_tolerance: u32,
    /// Keep the original volume after a completed resize.
    #[ortho_config(default = false)]
    pub keep_original_volume: bool,
    /// Probe the login port instead of sleeping a fixed delay.
    #[ortho_config(default = true)]
    pub login_probe: bool,
    /// Deadline for the login port probe.
    #[ortho_config(default = 300)]
    pub login_timeout_secs: u64,
    /// Fixed delay before the guest step when probing is disabled.
    #[ortho_config(default = DEFAULT_SETTLE_DELAY_SECS)]
    pub settle_delay_secs: u64,
    /// Root filesystem type: `auto`, `ext4`, `xfs`, or `btrfs`.
    #[ortho_config(default = "auto".to_owned())]
    pub guest_filesystem: String,
    /// Directory holding persisted session files.
    #[ortho_config(default = DEFAULT_STATE_DIR.to_owned())]
    pub state_dir: String,
}

impl ResizeConfig {
    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("rootgrow")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the settings and converts them into a [`ResizePolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the poll interval is zero or the
    /// filesystem name is not recognised.
    pub fn policy(&self) -> Result<ResizePolicy, ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Parse(String::from(
                "poll_interval_secs must be greater than zero (ROOTGROW_POLL_INTERVAL_SECS)",
            )));
        }
        let guest_filesystem = self
            .guest_filesystem
            .parse::<GuestFilesystem>()
            .map_err(|err| ConfigError::Parse(err.to_string()))?;

        let interval = Duration::from_secs(self.poll_interval_secs);
        let phase = |secs: u64| {
            PollPolicy::new(interval, Duration::from_secs(secs))
                .with_error_tolerance(self.poll_error_tolerance)
        };
        let login = if self.login_probe {
            LoginWait::Probe {
                timeout: Duration::from_secs(self.login_timeout_secs),
            }
        } else {
            LoginWait::FixedDelay(Duration::from_secs(self.settle_delay_secs))
        };

        Ok(ResizePolicy {
            stop: phase(self.stop_timeout_secs),
            detach: phase(self.detach_timeout_secs),
            clone: phase(self.clone_timeout_secs),
            attach: phase(self.attach_timeout_secs),
            start: phase(self.start_timeout_secs),
            keep_original_volume: self.keep_original_volume,
            login,
            login_poll_interval: interval,
            guest_filesystem,
        })
    }

    /// Directory holding persisted session files.
    #[must_use]
    pub fn state_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.state_dir)
    }
}

/// How the guest step waits for the instance to accept logins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoginWait {
    /// Poll a TCP connect on the login port until it succeeds.
    Probe {
        /// Deadline for the probe.
        timeout: Duration,
    },
    /// Sleep a fixed delay before connecting.
    FixedDelay(Duration),
}

/// Validated per-phase timing and behaviour for one orchestrator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResizePolicy {
    /// Wait for the instance to stop.
    pub stop: PollPolicy,
    /// Wait for the original volume to detach.
    pub detach: PollPolicy,
    /// Wait for the clone to become available.
    pub clone: PollPolicy,
    /// Wait for the clone to attach.
    pub attach: PollPolicy,
    /// Wait for the instance to run.
    pub start: PollPolicy,
    /// Keep the original volume after completion.
    pub keep_original_volume: bool,
    /// Login readiness strategy for the guest step.
    pub login: LoginWait,
    /// Delay between login probes.
    pub login_poll_interval: Duration,
    /// Root filesystem type for the guest step.
    pub guest_filesystem: GuestFilesystem,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        let phase = |timeout| PollPolicy::new(DEFAULT_POLL_INTERVAL, timeout);
        Self {
            stop: phase(DEFAULT_STOP_TIMEOUT),
            detach: phase(DEFAULT_DETACH_TIMEOUT),
            clone: phase(DEFAULT_CLONE_TIMEOUT),
            attach: phase(DEFAULT_ATTACH_TIMEOUT),
            start: phase(DEFAULT_START_TIMEOUT),
            keep_original_volume: false,
            login: LoginWait::Probe {
                timeout: DEFAULT_LOGIN_TIMEOUT,
            },
            login_poll_interval: DEFAULT_POLL_INTERVAL,
            guest_filesystem: GuestFilesystem::Auto,
        }
    }
}

impl ResizePolicy {
    /// Uses the same interval and deadline for every phase.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub fn uniform(interval: Duration, timeout: Duration) -> Self {
        let phase = PollPolicy::new(interval, timeout);
        Self {
            stop: phase,
            detach: phase,
            clone: phase,
            attach: phase,
            start: phase,
            login: LoginWait::Probe { timeout },
            login_poll_interval: interval,
            ..Self::default()
        }
    }

    /// Overrides whether the original volume survives a completed resize.
    #[must_use]
    pub const fn with_keep_original_volume(mut self, keep: bool) -> Self {
        self.keep_original_volume = keep;
        self
    }

    /// Overrides the login readiness strategy.
    #[must_use]
    pub const fn with_login_wait(mut self, login: LoginWait) -> Self {
        self.login = login;
        self
    }

    /// Overrides the tolerated consecutive poll failures for every phase.
    #[must_use]
    pub const fn with_error_tolerance(mut self, tolerance: u32) -> Self {
        self.stop = self.stop.with_error_tolerance(tolerance);
        self.detach = self.detach.with_error_tolerance(tolerance);
        self.clone = self.clone.with_error_tolerance(tolerance);
        self.attach = self.attach.with_error_tolerance(tolerance);
        self.start = self.start.with_error_tolerance(tolerance);
        self
    }

    /// Overrides the guest filesystem type.
    #[must_use]
    pub const fn with_guest_filesystem(mut self, filesystem: GuestFilesystem) -> Self {
        self.guest_filesystem = filesystem;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn defaults() -> ResizeConfig {
        ResizeConfig {
            poll_interval_secs: 5,
            stop_timeout_secs: 300,
            detach_timeout_secs: 120,
            clone_timeout_secs: 900,
            attach_timeout_secs: 120,
            start_timeout_secs: 300,
            poll_error_tolerance: 3,
            keep_original_volume: false,
            login_probe: true,
            login_timeout_secs: 300,
            settle_delay_secs: DEFAULT_SETTLE_DELAY_SECS,
            guest_filesystem: String::from("auto"),
            state_dir: String::from(DEFAULT_STATE_DIR),
        }
    }

    #[rstest]
    fn default_config_matches_default_policy(defaults: ResizeConfig) {
        let policy = defaults.policy().expect("defaults should validate");
        assert_eq!(policy, ResizePolicy::default());
    }

    #[rstest]
    fn disabling_probe_uses_settle_delay(defaults: ResizeConfig) {
        let config = ResizeConfig {
            login_probe: false,
            settle_delay_secs: 40,
            ..defaults
        };
        let policy = config.policy().expect("config should validate");
        assert_eq!(policy.login, LoginWait::FixedDelay(Duration::from_secs(40)));
    }

    #[rstest]
    fn zero_interval_is_rejected(defaults: ResizeConfig) {
        let config = ResizeConfig {
            poll_interval_secs: 0,
            ..defaults
        };
        let err = config.policy().expect_err("zero interval should fail");
        assert!(err.to_string().contains("ROOTGROW_POLL_INTERVAL_SECS"));
    }

    #[rstest]
    fn unknown_filesystem_is_rejected(defaults: ResizeConfig) {
        let config = ResizeConfig {
            guest_filesystem: String::from("ntfs"),
            ..defaults
        };
        assert!(config.policy().is_err());
    }

    #[rstest]
    fn tolerance_applies_to_every_phase(defaults: ResizeConfig) {
        let config = ResizeConfig {
            poll_error_tolerance: 7,
            ..defaults
        };
        let policy = config.policy().expect("config should validate");
        for phase in [policy.stop, policy.detach, policy.clone, policy.attach, policy.start] {
            assert_eq!(phase.error_tolerance, 7);
        }
    }
}
