//! Binary entry point for the rootgrow CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rootgrow::{
    FileSessionStore, GuestFilesystem, GuestResizeError, OriginalVolumeDisposition, Phase,
    RemoteError, ResizeConfig, ResizeError, ResizeOrchestrator, ResizeOutcome, ResizePolicy, ResizeRequest,
    ResizeSession, ScalewayConfig, ScalewayProvider, ScalewayProviderError, SessionStore,
    SessionStoreError, SshConfig, SshExecutor, cancellation,
};

mod cli;

use cli::{Cli, Command, GrowFsCommand, ResizeCommand, StatusCommand};

const BYTES_PER_GB: u64 = 1_000_000_000;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(#[from] ScalewayProviderError),
    #[error("resize failed: {0}")]
    Resize(#[from] ResizeError<ScalewayProviderError>),
    #[error("guest filesystem grow failed: {0}")]
    Guest(#[from] GuestResizeError<ScalewayProviderError>),
    #[error("ssh configuration error: {0}")]
    Remote(#[from] RemoteError),
    #[error("session store error: {0}")]
    Session(#[from] SessionStoreError),
    #[error("no resize session recorded for instance {0}")]
    NoSession(String),
    #[error("{0} GB does not fit in a byte count")]
    SizeOverflow(u64),
    #[error(
        "instance {instance} has an unfinished resize session in phase {phase}; \
         inspect it with `rootgrow status --instance {instance}` and remove {path} \
         once no other resize is running"
    )]
    SessionInProgress {
        instance: String,
        phase: Phase,
        path: String,
    },
    #[error("interrupted; the guest command may still be running on the instance")]
    Interrupted,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match dispatch(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "rootgrow=info",
        1 => "rootgrow=debug",
        _ => "rootgrow=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(command: Command) -> Result<(), CliError> {
    match command {
        Command::Resize(args) => resize_command(args).await,
        Command::GrowFs(args) => grow_fs_command(&args).await,
        Command::Status(args) => status_command(&args),
    }
}

async fn resize_command(args: ResizeCommand) -> Result<(), CliError> {
    let new_size_bytes = args
        .size_gb
        .checked_mul(BYTES_PER_GB)
        .ok_or(CliError::SizeOverflow(args.size_gb))?;
    let resize_config = load_resize_config()?;
    let base_policy = resize_config.policy().map_err(config_error)?;
    let policy = apply_filesystem(base_policy, args.filesystem.as_deref())?
        .with_keep_original_volume(resize_config.keep_original_volume || args.keep_original);

    let store = FileSessionStore::new(resize_config.state_dir());
    ensure_no_session_in_progress(&store, &args.instance)?;

    let scaleway_config = ScalewayConfig::load_without_cli_args().map_err(config_error)?;
    let zone = args
        .zone
        .unwrap_or_else(|| scaleway_config.default_zone.clone());
    let provider = ScalewayProvider::new(scaleway_config)?
        .with_snapshot_wait(policy.clone.interval, policy.clone.timeout);
    let orchestrator = ResizeOrchestrator::new(provider)
        .with_store(store)
        .with_policy(policy);

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping at the next safe point");
            handle.cancel();
        }
    });

    let request = ResizeRequest::new(args.instance, zone, new_size_bytes);
    let outcome = orchestrator.resize_with_cancel(request, &token).await?;
    report_outcome(&outcome);

    if args.grow_fs {
        grow_guest(&orchestrator, &outcome.session).await?;
    }
    Ok(())
}

async fn grow_fs_command(args: &GrowFsCommand) -> Result<(), CliError> {
    let resize_config = load_resize_config()?;
    let base_policy = resize_config.policy().map_err(config_error)?;
    let policy = apply_filesystem(base_policy, args.filesystem.as_deref())?;
    let store = FileSessionStore::new(resize_config.state_dir());
    let session = store
        .load(&args.instance)?
        .ok_or_else(|| CliError::NoSession(args.instance.clone()))?;

    let scaleway_config = ScalewayConfig::load_without_cli_args().map_err(config_error)?;
    let orchestrator = ResizeOrchestrator::new(ScalewayProvider::new(scaleway_config)?)
        .with_store(store)
        .with_policy(policy);
    grow_guest(&orchestrator, &session).await
}

async fn grow_guest<S: SessionStore>(
    orchestrator: &ResizeOrchestrator<ScalewayProvider, S>,
    session: &ResizeSession,
) -> Result<(), CliError> {
    let ssh_config = SshConfig::load_without_cli_args().map_err(config_error)?;
    let credentials = ssh_config.credentials();
    let executor = SshExecutor::with_process_runner(ssh_config)?;
    let output = tokio::select! {
        outcome = orchestrator.run_guest_resize(&executor, session, &credentials) => outcome?,
        _ = tokio::signal::ctrl_c() => return Err(CliError::Interrupted),
    };

    let mut stdout = io::stdout();
    write!(stdout, "{}", output.stdout).ok();
    writeln!(
        stdout,
        "grew root filesystem on instance {}",
        session.instance_id()
    )
    .ok();
    Ok(())
}

fn status_command(args: &StatusCommand) -> Result<(), CliError> {
    let resize_config = load_resize_config()?;
    let store = FileSessionStore::new(resize_config.state_dir());
    let session = store
        .load(&args.instance)?
        .ok_or_else(|| CliError::NoSession(args.instance.clone()))?;
    let rendered = serde_json::to_string_pretty(&session).map_err(|err| {
        CliError::Session(SessionStoreError::Serialize {
            message: err.to_string(),
        })
    })?;

    let mut stdout = io::stdout();
    writeln!(stdout, "{rendered}").ok();
    if !session.is_completed() && session.phase.is_terminal() {
        writeln!(stdout, "{}", session.recovery_report()).ok();
    }
    Ok(())
}

/// Refuses to start while another run's session for the instance has not
/// reached a terminal phase.
fn ensure_no_session_in_progress(
    store: &FileSessionStore,
    instance: &str,
) -> Result<(), CliError> {
    match store.load(instance)? {
        Some(session) if !session.phase.is_terminal() => Err(CliError::SessionInProgress {
            instance: instance.to_owned(),
            phase: session.phase,
            path: store.session_path(instance)?.into_string(),
        }),
        _ => Ok(()),
    }
}

fn load_resize_config() -> Result<ResizeConfig, CliError> {
    ResizeConfig::load_without_cli_args().map_err(config_error)
}

fn apply_filesystem(
    policy: ResizePolicy,
    filesystem: Option<&str>,
) -> Result<ResizePolicy, CliError> {
    let Some(name) = filesystem else {
        return Ok(policy);
    };
    let parsed = name
        .parse::<GuestFilesystem>()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(policy.with_guest_filesystem(parsed))
}

fn config_error(err: impl std::fmt::Display) -> CliError {
    CliError::Config(err.to_string())
}

fn report_outcome(outcome: &ResizeOutcome) {
    let mut stdout = io::stdout();
    let session = &outcome.session;
    let new_volume = session
        .cloned_volume
        .as_ref()
        .map_or("<unknown>", |volume| volume.id.as_str());
    writeln!(
        stdout,
        "instance {} now boots from {new_volume} ({} bytes)",
        session.instance_id(),
        session.request.new_size_bytes
    )
    .ok();

    let original = session
        .original_volume
        .as_ref()
        .map_or("<unknown>", |volume| volume.id.as_str());
    match &outcome.original_volume {
        OriginalVolumeDisposition::Deleted => {
            writeln!(stdout, "original volume {original} deleted").ok();
        }
        OriginalVolumeDisposition::Retained { reason } => {
            writeln!(stdout, "original volume {original} retained: {reason}").ok();
        }
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, GuestFilesystem::Auto)]
    #[case(Some("xfs"), GuestFilesystem::Xfs)]
    fn apply_filesystem_overrides_policy(
        #[case] name: Option<&str>,
        #[case] expected: GuestFilesystem,
    ) {
        let policy = apply_filesystem(ResizePolicy::default(), name).expect("known filesystem");
        assert_eq!(policy.guest_filesystem, expected);
    }

    #[test]
    fn apply_filesystem_rejects_unknown_names() {
        let err = apply_filesystem(ResizePolicy::default(), Some("ntfs"))
            .expect_err("ntfs is unsupported");
        assert!(matches!(err, CliError::Config(ref message) if message.contains("ntfs")));
    }

    #[test]
    fn write_error_renders_single_line() {
        let mut buffer = Vec::new();
        write_error(&mut buffer, &CliError::NoSession(String::from("i-1")));
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "no resize session recorded for instance i-1\n"
        );
    }
}
