//! Session launch: wrapper-script construction and the detached spawn.
//!
//! Every launch embeds a fresh random token in the child's command line and
//! environment. The token is the session's identity credential for the rest
//! of its life; everything destructive checks it first.

use std::fs;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

use crate::error::SessionError;
use crate::naming::SessionPaths;
use crate::store;
use crate::store::SessionStatus;

pub const TOKEN_ENV_VAR: &str = "SESSIOND_SESSION_TOKEN";

/// What a caller asks for when launching a session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub name: String,
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Free-form label carried in the record, useful for UIs.
    pub window: Option<String>,
}

/// A freshly launched session: its initial persisted record and file triple.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub status: SessionStatus,
    pub paths: SessionPaths,
}

/// POSIX wrapper: exports the token (so env-inclusive `ps` sees it), runs
/// the command, then waits for stray background children. The exit status
/// prefers the command's own failure over the trailing wait.
pub(crate) fn posix_launch_script(token: &str, command: &str) -> String {
    format!(
        "export {TOKEN_ENV_VAR}={tok}\n\
         {command}\n\
         cmd_status=$?\n\
         wait\n\
         wait_status=$?\n\
         if [ $cmd_status -ne 0 ]; then exit $cmd_status; else exit $wait_status; fi\n",
        tok = shell_quote_single(token),
    )
}

/// cmd.exe has no `wait`; set the token and chain the command.
pub(crate) fn windows_launch_command(token: &str, command: &str) -> String {
    format!("set \"{TOKEN_ENV_VAR}={token}\" && {command}")
}

pub(crate) fn shell_quote_single(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(unix)]
pub(crate) fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "/bin/bash".to_string())
}

#[cfg(windows)]
pub(crate) fn default_shell() -> String {
    std::env::var("COMSPEC")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "cmd.exe".to_string())
}

/// Map a raw signal number to its conventional name.
#[cfg(unix)]
fn signal_name(raw: i32) -> String {
    match raw {
        libc::SIGHUP => "SIGHUP".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGQUIT => "SIGQUIT".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        libc::SIGABRT => "SIGABRT".to_string(),
        libc::SIGPIPE => "SIGPIPE".to_string(),
        other => format!("SIG{other}"),
    }
}

/// Best-effort diagnostic line into the session's output log; there is no
/// synchronous caller left to receive post-spawn failures.
fn append_diagnostic(path: &Path, message: &str) {
    use std::io::Write;
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "[{}]", message));
    if result.is_err() {
        warn!(path = %path.display(), "failed to append diagnostic to output log");
    }
}

/// Launch a detached session process and persist its initial record.
///
/// The record hits disk before this returns, so a supervisor crash right
/// after spawn still leaves enough on disk to find and stop the child.
pub async fn start_session(
    sessions_dir: &Path,
    request: StartRequest,
) -> Result<StartedSession, SessionError> {
    let command = request.command.trim().to_string();
    let paths = SessionPaths::new(sessions_dir, &request.name);
    if command.is_empty() {
        return Err(SessionError::MissingCommand(paths.name.clone()));
    }

    fs::create_dir_all(sessions_dir).map_err(|e| SessionError::Store {
        operation: "create_sessions_dir".to_string(),
        reason: format!("{}: {}", sessions_dir.display(), e),
    })?;

    // Fresh launch: clear any stale atomic-write shadows and reset the
    // output and control files so old content cannot masquerade as new.
    for path in [&paths.status_path, &paths.output_path, &paths.control_path] {
        store::safe_unlink(&store::tmp_path(path));
    }
    for path in [&paths.output_path, &paths.control_path] {
        fs::write(path, b"").map_err(|e| SessionError::OutputLog {
            name: paths.name.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;
    }

    let token = Uuid::new_v4().to_string();
    let output = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.output_path)
        .map_err(|e| SessionError::OutputLog {
            name: paths.name.clone(),
            reason: e.to_string(),
        })?;
    let output_err = output.try_clone().map_err(|e| SessionError::OutputLog {
        name: paths.name.clone(),
        reason: e.to_string(),
    })?;

    let cwd = match &request.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    let shell = default_shell();
    let mut cmd = Command::new(&shell);
    #[cfg(unix)]
    {
        cmd.arg("-c").arg(posix_launch_script(&token, &command));
        // New session: the child becomes its own group leader, so the
        // whole tree can be signaled as one group later.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.args(["/d", "/s", "/c", &windows_launch_command(&token, &command)]);
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
    cmd.current_dir(&cwd)
        .env(TOKEN_ENV_VAR, &token)
        .stdin(Stdio::null())
        .stdout(Stdio::from(output))
        .stderr(Stdio::from(output_err))
        .kill_on_drop(false);

    let mut child = cmd.spawn().map_err(|e| SessionError::SpawnFailed {
        name: paths.name.clone(),
        reason: e.to_string(),
    })?;

    let pid = child.id().map(|v| v as i32);
    #[cfg(unix)]
    let pgid = pid; // setsid leader: pgid == pid
    #[cfg(windows)]
    let pgid: Option<i32> = None; // no process groups in the record on Windows
    let now = Utc::now();
    let status = SessionStatus {
        name: paths.name.clone(),
        pid,
        pgid,
        token: Some(token.clone()),
        command,
        cwd,
        window: request.window,
        started_at: now,
        exited_at: None,
        exit_code: None,
        signal: None,
        platform: std::env::consts::OS.to_string(),
        output_path: paths.output_path.clone(),
        control_path: paths.control_path.clone(),
        status_path: paths.status_path.clone(),
        updated_at: now,
    };
    store::write_status(&paths.status_path, &status)?;
    debug!(session = %paths.name, pid = ?pid, "session launched");

    // Reap in the background so exit metadata lands in the record even
    // though the caller has long since returned.
    let status_path = paths.status_path.clone();
    let output_path = paths.output_path.clone();
    let name = paths.name.clone();
    tokio::spawn(async move {
        let wait = child.wait().await;
        let Some(mut record) = store::read_status(&status_path) else {
            return;
        };
        // A newer launch under the same name owns the record now.
        if record.token.as_deref() != Some(token.as_str()) {
            return;
        }
        record.pid = None;
        record.pgid = None;
        record.exited_at = Some(Utc::now());
        record.updated_at = Utc::now();
        match wait {
            Ok(exit) => {
                record.exit_code = exit.code();
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    record.signal = exit.signal().map(signal_name);
                }
            }
            Err(err) => {
                warn!(session = %name, error = %err, "failed to reap session child");
                append_diagnostic(&output_path, &format!("session error: {err}"));
                record.exit_code = Some(-1);
            }
        }
        if let Err(err) = store::write_status(&status_path, &record) {
            warn!(session = %name, error = %err, "failed to persist exit record");
        }
    });

    Ok(StartedSession { status, paths })
}
