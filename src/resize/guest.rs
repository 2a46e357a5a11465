//! Post-resize guest step: wait for login, then grow the root filesystem.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::provider::CloudComputeProvider;
use crate::remote::{LoginCredentials, RemoteCommandOutput, RemoteError, RemoteExecutor};
use crate::session_store::SessionStore;

use super::config::LoginWait;
use super::error::GuestResizeError;
use super::session::ResizeSession;
use super::ResizeOrchestrator;

const LOGIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

impl<P, S> ResizeOrchestrator<P, S>
where
    P: CloudComputeProvider,
    S: SessionStore,
{
    /// Grows the guest's root partition and filesystem after a completed
    /// resize.
    ///
    /// Refreshes the instance to learn its current address, waits for the
    /// login port according to the policy, and runs the grow script for the
    /// configured filesystem on the blocking pool. Failures leave the volume
    /// resize intact.
    ///
    /// # Errors
    ///
    /// Returns [`GuestResizeError`] when the session is not completed, the
    /// instance cannot be reached, or the script exits unsuccessfully.
    pub async fn run_guest_resize<X>(
        &self,
        executor: &X,
        session: &ResizeSession,
        credentials: &LoginCredentials,
    ) -> Result<RemoteCommandOutput, GuestResizeError<P::Error>>
    where
        X: RemoteExecutor + Clone + Send + 'static,
    {
        if !session.is_completed() {
            return Err(GuestResizeError::NotCompleted {
                phase: session.phase.clone(),
            });
        }

        let request = &session.request;
        let instance = self
            .provider()
            .get_instance(&request.instance_id, &request.region)
            .await
            .map_err(GuestResizeError::Provider)?
            .ok_or_else(|| GuestResizeError::InstanceNotFound {
                instance_id: request.instance_id.clone(),
                region: request.region.clone(),
            })?;
        let address = instance
            .public_address
            .ok_or_else(|| GuestResizeError::MissingAddress {
                instance_id: instance.id.clone(),
            })?;

        self.wait_for_login(&instance.id, address, credentials.port)
            .await?;

        let filesystem = self.policy().guest_filesystem;
        info!(instance_id = %instance.id, %address, %filesystem, "growing guest root filesystem");
        let worker = executor.clone();
        let login = credentials.clone();
        let script = filesystem.grow_script();
        let output = tokio::task::spawn_blocking(move || worker.execute(address, &login, &script))
            .await
            .map_err(|err| {
                GuestResizeError::Connection(RemoteError::Spawn {
                    program: String::from("guest command worker"),
                    message: err.to_string(),
                })
            })?
            .map_err(GuestResizeError::Connection)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(GuestResizeError::CommandFailed {
            status: output.exit_code,
            stderr: output.stderr,
        })
    }

    async fn wait_for_login(
        &self,
        instance_id: &str,
        address: IpAddr,
        port: u16,
    ) -> Result<(), GuestResizeError<P::Error>> {
        match self.policy().login {
            LoginWait::FixedDelay(delay) => {
                debug!(instance_id, delay_secs = delay.as_secs(), "waiting before guest login");
                sleep(delay).await;
                Ok(())
            }
            LoginWait::Probe { timeout: deadline } => {
                let interval = self.policy().login_poll_interval;
                if probe_login(SocketAddr::new(address, port), deadline, interval).await {
                    return Ok(());
                }
                Err(GuestResizeError::LoginUnreachable {
                    instance_id: instance_id.to_owned(),
                    port,
                    waited: deadline,
                })
            }
        }
    }
}

/// Attempts TCP connections until one succeeds or `deadline` elapses.
async fn probe_login(target: SocketAddr, deadline: Duration, interval: Duration) -> bool {
    let started = Instant::now();
    loop {
        let budget = deadline.saturating_sub(started.elapsed());
        let attempt = LOGIN_CONNECT_TIMEOUT.min(budget.max(Duration::from_millis(1)));
        if matches!(timeout(attempt, TcpStream::connect(target)).await, Ok(Ok(_))) {
            debug!(%target, "login port accepting connections");
            return true;
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return false;
        }
        sleep(interval.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn probe_succeeds_against_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let target = listener.local_addr().expect("local addr");

        let reachable =
            probe_login(target, Duration::from_secs(2), Duration::from_millis(10)).await;

        assert!(reachable);
    }

    #[tokio::test]
    async fn probe_gives_up_after_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let target = listener.local_addr().expect("local addr");
        drop(listener);

        let started = Instant::now();
        let reachable =
            probe_login(target, Duration::from_millis(100), Duration::from_millis(20)).await;

        assert!(!reachable);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
