//! SSH client configuration and validation.
//!
//! [`SshConfig`] is loaded via `ortho-config`, which merges defaults,
//! configuration files, and environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::{LoginCredentials, RemoteError};

/// Default login port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH client settings loaded via `ortho-config`.
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
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Login port on the guest.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking. Disabled by default because the
    /// guest's host key does not change but its public address may.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to the SSH private key file. Supports tilde expansion. When
    /// absent, SSH falls back to its default key locations. Validation
    /// rejects empty or whitespace-only values.
    pub ssh_identity_file: Option<String>,
}

impl SshConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when any required field is
    /// empty or the port is zero.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        if self.ssh_port == 0 {
            return Err(RemoteError::InvalidConfig {
                field: String::from("ssh_port"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`crate::config::ConfigError::Parse`] when merging sources
    /// fails.
    pub fn load_without_cli_args() -> Result<Self, crate::config::ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("rootgrow")])
            .map_err(|err| crate::config::ConfigError::Parse(err.to_string()))
    }

    /// Builds login credentials from the configured defaults.
    #[must_use]
    pub fn credentials(&self) -> LoginCredentials {
        LoginCredentials {
            user: self.ssh_user.clone(),
            identity_file: self.ssh_identity_file.clone(),
            port: self.ssh_port,
        }
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), RemoteError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        Self::require_optional_value(Some(value), field)
    }
}
