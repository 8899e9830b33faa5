//! Process lifecycle: states, startup handshake, shutdown escalation.
//!
//! Startup consumes frames until the first `ready` frame, within a bounded
//! window. Everything seen before readiness (the `start` banner, log noise,
//! stray replies) is discarded. Shutdown escalates unconditionally:
//!
//! 1. the caller sends `/quit` and waits `grace` for a voluntary exit,
//! 2. `SIGTERM` (unix) and another `grace`,
//! 3. `SIGKILL` and reap.
//!
//! No step can block indefinitely.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::machine::codec::MachineCodec;
use crate::machine::frame::{self, FrameKind};
use crate::{AppError, Result};

/// Observable state of the child process handle.
///
/// A [`MachineClient`](super::MachineClient) only exists once the handshake
/// has succeeded, so [`MachineClient::state`](super::MachineClient::state)
/// starts at `Running`. `NotStarted`, `Starting` and `Ready` are the phases
/// of `connect` itself; they appear in its `DEBUG` logs and never on a live
/// client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Nothing spawned yet.
    NotStarted,
    /// Spawned; waiting for the `ready` frame.
    Starting,
    /// `ready` observed; reader not yet running.
    Ready,
    /// Reader loop running; commands accepted.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Child gone or client closed.
    Terminated,
}

impl ProcessState {
    /// Whether commands may be sent in this state.
    #[must_use]
    pub fn accepts_commands(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Consume frames until a `ready` frame arrives or `timeout` elapses.
///
/// Returns the number of non-ready lines discarded.
///
/// # Errors
///
/// - `AppError::StartupTimeout`: no `ready` frame within `timeout`.
/// - `AppError::ClientClosed`: the stream ended before readiness.
/// - `AppError::Io`: the stream failed.
pub async fn wait_for_ready<R>(
    framed: &mut FramedRead<R, MachineCodec>,
    timeout: Duration,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let handshake = async {
        let mut discarded = 0usize;
        loop {
            match framed.next().await {
                None => {
                    return Err(AppError::ClientClosed(
                        "process exited before ready signal".into(),
                    ));
                }
                Some(Err(err)) => {
                    return Err(AppError::Io(format!(
                        "failed to read ready signal: {err}"
                    )));
                }
                Some(Ok(line)) => match frame::decode(&line) {
                    Ok(f) if f.kind == FrameKind::Ready => return Ok(discarded),
                    Ok(f) => {
                        discarded += 1;
                        debug!(kind = f.kind.as_str(), "startup: discarding pre-ready frame");
                    }
                    Err(skip) => {
                        discarded += 1;
                        debug!(reason = %skip, "startup: discarding non-frame line");
                    }
                },
            }
        }
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(result) => {
            let discarded = result?;
            info!(discarded, "ready signal received");
            Ok(discarded)
        }
        Err(_elapsed) => Err(AppError::StartupTimeout(format!(
            "ready signal not received within {timeout:?}"
        ))),
    }
}

/// How the child ended during [`terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPath {
    /// Exited on its own within the first grace period.
    Voluntary,
    /// Exited after `SIGTERM`.
    Terminated,
    /// Force-killed.
    Killed,
}

/// Wait for `child` to exit, escalating to `SIGTERM` then `SIGKILL`.
///
/// The caller is expected to have asked the child to quit already.
pub async fn terminate(child: &mut Child, grace: Duration) -> ExitPath {
    let pid = child.id();

    if wait_with_grace(child, grace).await {
        info!(pid, "child exited voluntarily");
        return ExitPath::Voluntary;
    }

    warn!(pid, ?grace, "child still alive after quit, sending SIGTERM");
    send_terminate(child);
    if wait_with_grace(child, grace).await {
        info!(pid, "child exited after SIGTERM");
        return ExitPath::Terminated;
    }

    warn!(pid, "child ignored SIGTERM, killing");
    force_kill(child).await;
    ExitPath::Killed
}

/// Kill `child` immediately and reap it.
pub async fn force_kill(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!(%err, "kill failed; child probably already exited");
    }
}

async fn wait_with_grace(child: &mut Child, grace: Duration) -> bool {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(?status, "child exited");
            true
        }
        Ok(Err(err)) => {
            warn!(%err, "error waiting for child");
            false
        }
        Err(_elapsed) => false,
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(raw) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(%err, pid = raw, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    // No graceful signal on this platform; the kill step follows.
    if let Err(err) = child.start_kill() {
        debug!(%err, "start_kill failed");
    }
}
