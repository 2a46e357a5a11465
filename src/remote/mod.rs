//! Remote script execution on the guest over the system `ssh` client.
//!
//! Scripts are shell-escaped and handed to `sh -c` on the guest so the remote
//! login shell does not reinterpret them. Remote exit codes are preserved.

use std::ffi::OsString;
use std::net::IpAddr;

use shell_escape::unix::escape;
use thiserror::Error;

mod config;
mod types;
mod util;

pub use config::{DEFAULT_SSH_PORT, SshConfig};
pub use types::{
    CommandOutput, CommandRunner, LoginCredentials, ProcessCommandRunner, RemoteCommandOutput,
    RemoteExecutor,
};
pub use util::expand_tilde;

/// Errors surfaced while executing commands on the guest.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set ROOTGROW_{env_suffix} or add {field} to rootgrow.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when `ssh` cannot connect to or authenticate with the guest.
    #[error("ssh could not reach the guest: {message}")]
    Connection {
        /// Diagnostic printed by the ssh client.
        message: String,
    },
}

/// Status the OpenSSH client exits with when the session itself fails.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Executes guest scripts through `ssh`.
#[derive(Clone, Debug)]
pub struct SshExecutor<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl SshExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: SshConfig) -> Result<Self, RemoteError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshExecutor<R> {
    /// Creates a new executor using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    fn build_ssh_args(
        &self,
        address: IpAddr,
        credentials: &LoginCredentials,
        script: &str,
    ) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(credentials.port.to_string()),
        ];

        if let Some(ref identity_file) = credentials.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args.push(OsString::from(format!("{}@{address}", credentials.user)));
        args.push(OsString::from(format!("sh -c {}", escape(script.into()))));
        args
    }
}

impl<R: CommandRunner> RemoteExecutor for SshExecutor<R> {
    fn execute(
        &self,
        address: IpAddr,
        credentials: &LoginCredentials,
        script: &str,
    ) -> Result<RemoteCommandOutput, RemoteError> {
        let args = self.build_ssh_args(address, credentials, script);
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        if output.code == Some(SSH_CONNECTION_FAILURE) {
            let diagnostic = output.stderr.trim();
            return Err(RemoteError::Connection {
                message: if diagnostic.is_empty() {
                    format!("{} exited with status {SSH_CONNECTION_FAILURE}", self.config.ssh_bin)
                } else {
                    diagnostic.to_owned()
                },
            });
        }

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests;
