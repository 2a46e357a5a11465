//! Tests for SSH configuration validation.

use super::super::*;
use super::fixtures::base_config;
use rstest::rstest;

#[rstest]
fn validate_accepts_defaults(base_config: SshConfig) {
    assert!(base_config.validate().is_ok());
}

#[rstest]
#[case::blank_bin(|cfg: &mut SshConfig| cfg.ssh_bin = String::from("  "), "ssh_bin")]
#[case::blank_user(|cfg: &mut SshConfig| cfg.ssh_user = String::new(), "ssh_user")]
#[case::blank_identity(
    |cfg: &mut SshConfig| cfg.ssh_identity_file = Some(String::from(" ")),
    "ssh_identity_file"
)]
#[case::zero_port(|cfg: &mut SshConfig| cfg.ssh_port = 0, "ssh_port")]
fn validate_names_offending_field(
    base_config: SshConfig,
    #[case] mutate: fn(&mut SshConfig),
    #[case] field: &str,
) {
    let mut config = base_config;
    mutate(&mut config);
    let err = config.validate().expect_err("config should be rejected");
    assert_eq!(
        err,
        RemoteError::InvalidConfig {
            field: field.to_owned()
        }
    );
}

#[test]
fn invalid_config_message_points_at_env_var() {
    let err = RemoteError::InvalidConfig {
        field: String::from("ssh_user"),
    };
    let message = err.to_string();
    assert!(message.contains("ROOTGROW_SSH_USER"), "{message}");
    assert!(message.contains("rootgrow.toml"), "{message}");
}

#[rstest]
fn credentials_follow_configured_defaults(base_config: SshConfig) {
    let credentials = base_config.credentials();
    assert_eq!(credentials.user, "root");
    assert_eq!(credentials.port, 22);
    assert_eq!(credentials.identity_file.as_deref(), Some("~/.ssh/id_ed25519"));
}
