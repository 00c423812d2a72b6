//! Bounded termination: graceful signal first, forceful escalation after.

use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::warn;

use crate::error::SessionError;
use crate::process::is_session_alive;
use crate::process::ProcessControl;
use crate::process::Signal;
use crate::pstree::list_descendants;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Deliver one signal across the whole session tree: the process group
/// first, then every known descendant leaves-first, then the leader.
/// Returns whether any delivery landed.
pub async fn kill_tree_once(
    control: &dyn ProcessControl,
    pid: Option<i32>,
    pgid: Option<i32>,
    signal: Signal,
) -> bool {
    let mut delivered = false;
    if let Some(pgid) = pgid {
        delivered |= control.signal_group(pgid, signal).await;
    }
    if let Some(pid) = pid {
        for target in list_descendants(control, pid).await {
            delivered |= control.signal_pid(target, signal).await;
        }
        if signal == Signal::Kill {
            delivered |= control.force_kill_tree(pid).await;
        }
    }
    delivered
}

/// Poll until the session is gone or `timeout` elapses. Returns true when
/// the session exited within the window.
pub async fn wait_for_session_exit(
    control: &dyn ProcessControl,
    pid: Option<i32>,
    pgid: Option<i32>,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let poll = poll_interval.max(MIN_POLL_INTERVAL);
    let deadline = Instant::now() + timeout;
    loop {
        if !is_session_alive(control, pid, pgid).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Escalating termination: a graceful signal (SIGTERM unless the caller
/// picked another), bounded wait, then SIGKILL, bounded wait.
///
/// A survivor after both phases is reported loudly instead of being
/// silently recorded as stopped.
pub async fn terminate_session(
    control: &dyn ProcessControl,
    name: &str,
    pid: Option<i32>,
    pgid: Option<i32>,
    graceful: Signal,
    stop_timeout: Duration,
    poll_interval: Duration,
) -> Result<(), SessionError> {
    if !is_session_alive(control, pid, pgid).await {
        return Ok(());
    }

    kill_tree_once(control, pid, pgid, graceful).await;
    if wait_for_session_exit(control, pid, pgid, stop_timeout, poll_interval).await {
        debug!(session = %name, signal = %graceful, "session exited after graceful signal");
        return Ok(());
    }

    warn!(session = %name, pid = ?pid, "session survived {graceful}, escalating to SIGKILL");
    kill_tree_once(control, pid, pgid, Signal::Kill).await;
    if wait_for_session_exit(control, pid, pgid, stop_timeout, poll_interval).await {
        return Ok(());
    }

    Err(SessionError::StopTimeout {
        name: name.to_string(),
        pid,
    })
}
