//! Backend process lifecycle and the single shutdown routine.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{error, info, warn};

use super::server::RunningServer;
use crate::errors::SupervisorError;

/// How to start the backend service.
#[derive(Debug, Clone)]
pub struct BackendCommand {
    /// Shell command line, run through `sh -c`
    pub command: String,
    pub dir: PathBuf,
    /// Exported to the child as `PORT`
    pub port: u16,
}

fn shell(command: &str, dir: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(dir);
    cmd
}

/// Run the build command to completion with inherited stdio.
pub async fn run_build(command: &str, dir: &Path) -> Result<(), SupervisorError> {
    info!("Building backend: {}", command);
    let status = shell(command, dir)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|source| SupervisorError::SpawnFailed {
            command: command.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(SupervisorError::BuildFailed {
            command: command.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}

const GROUP_POLL: Duration = Duration::from_millis(50);

/// A running backend and the process group it leads.
pub struct BackendProcess {
    child: Child,
    /// Captured at spawn; `Child::id` is gone once the leader is reaped.
    pgid: Option<u32>,
}

/// Spawn the backend in its own process group so the whole tree can be
/// signalled on shutdown.
pub fn spawn_backend(backend: &BackendCommand) -> Result<BackendProcess, SupervisorError> {
    let mut cmd = shell(&backend.command, &backend.dir);
    cmd.env("PORT", backend.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
        command: backend.command.clone(),
        source,
    })?;
    let pgid = child.id();
    info!(
        pid = pgid.unwrap_or_default(),
        port = backend.port,
        "Backend started: {}",
        backend.command
    );
    Ok(BackendProcess { child, pgid })
}

impl BackendProcess {
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send `signal` to every process in the backend's group.
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) {
        if let Some(pgid) = self.pgid {
            // SAFETY: kill(2) with a negative pid targets the process group
            // created in `spawn_backend`; it has no memory-safety
            // preconditions. ESRCH once the group is empty is expected.
            unsafe {
                libc::kill(-(pgid as libc::pid_t), signal);
            }
        }
    }

    #[cfg(unix)]
    fn group_alive(&self) -> bool {
        // SAFETY: signal 0 only checks that the group exists.
        self.pgid
            .is_some_and(|pgid| unsafe { libc::kill(-(pgid as libc::pid_t), 0) } == 0)
    }

    /// Stop the backend: SIGTERM to the group, then SIGKILL if anything in
    /// it outlives `grace`.
    ///
    /// The group is signalled even when the leader has already exited, so
    /// processes it started do not outlive the deployment.
    pub async fn terminate(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        let leader_exited = match self.child.try_wait() {
            Ok(Some(status)) => {
                info!("Backend already exited ({}); stopping its process group", status);
                true
            }
            _ => false,
        };

        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        let mut stopped = match timeout_at(deadline, self.child.wait()).await {
            Ok(Ok(status)) => {
                if !leader_exited {
                    info!("Backend stopped ({})", status);
                }
                true
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for backend: {}", e);
                false
            }
            Err(_) => false,
        };

        #[cfg(unix)]
        if stopped && leader_exited {
            while self.group_alive() && Instant::now() < deadline {
                sleep(GROUP_POLL).await;
            }
            stopped = !self.group_alive();
        }

        if !stopped {
            warn!("Backend did not exit within {:?}; killing", grace);
            #[cfg(unix)]
            self.signal_group(libc::SIGKILL);
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

/// SIGINT (Ctrl+C) and SIGTERM listeners.
///
/// Registering replaces the default disposition, so a signal that arrives
/// before [`ShutdownSignal::recv`] is first awaited is held rather than
/// killing the process.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignal {
    pub fn register() -> Result<Self, SupervisorError> {
        #[cfg(unix)]
        {
            let listen = |kind: SignalKind, name: &'static str| {
                signal(kind).map_err(|source| SupervisorError::SignalHandler {
                    signal: name,
                    source,
                })
            };
            Ok(Self {
                interrupt: listen(SignalKind::interrupt(), "SIGINT")?,
                terminate: listen(SignalKind::terminate(), "SIGTERM")?,
            })
        }
        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Resolves on the next SIGINT or SIGTERM.
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        tokio::select! {
            _ = self.interrupt.recv() => {},
            _ = self.terminate.recv() => {},
        }
        #[cfg(not(unix))]
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Owns the backend and the listeners; every exit path goes through one
/// cleanup routine.
pub struct Supervisor {
    backend: BackendProcess,
    server: RunningServer,
    grace: Duration,
}

impl Supervisor {
    pub fn new(backend: BackendProcess, server: RunningServer, grace: Duration) -> Self {
        Self {
            backend,
            server,
            grace,
        }
    }

    /// Run until `shutdown` resolves, the backend exits, or a listener
    /// fails. Cleanup always completes before this returns.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), SupervisorError> {
        let Supervisor {
            mut backend,
            mut server,
            grace,
        } = self;

        let outcome = tokio::select! {
            _ = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
            status = backend.wait() => {
                let reason = match status {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                error!("Backend process exited unexpectedly ({})", reason);
                Err(SupervisorError::BackendExited(reason))
            }
            err = server.stopped() => {
                error!("{}", err);
                Err(err)
            }
        };

        backend.terminate(grace).await;
        server.shutdown(grace).await;
        info!("Shutdown complete");
        outcome
    }
}
