//! Graceful child termination: SIGTERM first, SIGKILL after a bounded grace
//! period.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// Terminate `child`, giving it `grace` to exit cleanly after SIGTERM before
/// escalating to SIGKILL. Always reaps the child and returns its exit status.
#[cfg(unix)]
pub(crate) async fn shutdown_child(mut child: Child, grace: Duration) -> io::Result<ExitStatus> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw_pid) = child.id() else {
        // Already exited; just reap it.
        return child.wait().await;
    };
    let Ok(pid) = i32::try_from(raw_pid) else {
        child.start_kill()?;
        return child.wait().await;
    };
    let pid = Pid::from_raw(pid);

    if let Err(err) = kill(pid, Signal::SIGTERM) {
        warn!(%pid, error = %err, "could not deliver SIGTERM, escalating to SIGKILL");
        child.start_kill()?;
        return child.wait().await;
    }
    debug!(%pid, "sent SIGTERM, waiting for exit");

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(%pid, grace_secs = grace.as_secs(), "grace period expired, sending SIGKILL");
            child.start_kill()?;
            child.wait().await
        }
    }
}

/// Windows has no SIGTERM equivalent worth emulating here; terminate
/// immediately.
#[cfg(not(unix))]
pub(crate) async fn shutdown_child(mut child: Child, _grace: Duration) -> io::Result<ExitStatus> {
    child.start_kill()?;
    child.wait().await
}
