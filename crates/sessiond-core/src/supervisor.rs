//! The supervisor facade: every session operation callers get.
//!
//! One `Supervisor` owns a sessions directory and a platform process-control
//! handle. It holds no in-memory session table; the on-disk records are the
//! single source of truth, which is what lets a freshly restarted supervisor
//! pick up sessions launched by a previous incarnation.
//!
//! Names are sanitized to a shared on-disk namespace, so two callers using
//! the same name race on the same record; last write wins.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::config::SupervisorConfig;
use crate::error::SessionError;
use crate::launcher;
use crate::launcher::StartRequest;
use crate::naming::resolve_sessions_dir;
use crate::naming::SessionPaths;
use crate::ports;
use crate::process::is_session_alive;
use crate::process::native_control;
use crate::process::verify_pid_token;
use crate::process::ProcessControl;
use crate::process::Signal;
use crate::pstree::resolve_runtime_from_token;
use crate::store;
use crate::store::SessionStatus;
use crate::tail::tail_lines;
use crate::terminate::terminate_session;

const PORT_SCAN_LINES: usize = 140;
const PORT_SCAN_BYTES: u64 = 128 * 1024;

const DEFAULT_LOG_LINES: usize = 500;
const MAX_LOG_LINES: usize = 50_000;
const DEFAULT_LOG_BYTES: u64 = 1024 * 1024;
const MIN_LOG_BYTES: u64 = 1024;
const MAX_LOG_BYTES: u64 = 4 * 1024 * 1024;

/// A session as reported to callers: the persisted record plus everything
/// derived live (probe results, recovery, sniffed ports).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub running: bool,
    /// Leader pid after recovery, when it differs from the record.
    pub resolved_pid: Option<i32>,
    pub resolved_pgid: Option<i32>,
    /// True when the record's pid was stale and the token scan found the
    /// session running elsewhere.
    pub recovered: bool,
    pub port: Option<u16>,
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    /// Whether the sessions directory exists at all.
    pub available: bool,
    pub platform: String,
    pub sessions_dir: PathBuf,
    pub sessions: Vec<SessionView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillOutcome {
    pub name: String,
    /// Pid that was live when the kill began, if any.
    pub pid: Option<i32>,
    /// Whether a live process was actually terminated (false for a
    /// record-only or unknown session).
    pub terminated: bool,
    pub removed_record: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub name: String,
    pub pid: Option<i32>,
    pub terminated: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KillAllSummary {
    pub attempted: usize,
    pub killed: Vec<String>,
    pub errors: Vec<KillAllError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillAllError {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSlice {
    pub name: String,
    pub path: PathBuf,
    pub lines: usize,
    /// Total size of the log file on disk, not of `content`.
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub content: String,
}

pub struct Supervisor {
    config: SupervisorConfig,
    control: Arc<dyn ProcessControl>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            control: native_control(),
        }
    }

    /// Inject a process-control implementation, for tests.
    pub fn with_control(config: SupervisorConfig, control: Arc<dyn ProcessControl>) -> Self {
        Self { config, control }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        resolve_sessions_dir(self.config.session_root.as_deref())
    }

    /// Launch a named session. An existing live session under the same name
    /// is terminated first so its tree cannot be orphaned by the overwrite.
    pub async fn start(&self, request: StartRequest) -> Result<SessionView, SessionError> {
        let dir = self.sessions_dir();
        let paths = SessionPaths::new(&dir, &request.name);

        if let Some(existing) = store::read_status(&paths.status_path) {
            let runtime = self.locate_runtime(&existing).await;
            if runtime.alive {
                ensure_verified(&existing, &runtime)?;
                info!(session = %paths.name, "terminating previous session before relaunch");
                self.terminate(&paths.name, &runtime, Signal::Term).await?;
            }
        }

        let started = launcher::start_session(&dir, request).await?;
        info!(
            session = %started.paths.name,
            pid = ?started.status.pid,
            "session started"
        );
        Ok(self.view_for(started.status).await)
    }

    /// Every session with a record on disk, with live probe results.
    /// Most recently started first.
    pub async fn list(&self) -> SessionList {
        let dir = self.sessions_dir();
        let available = dir.is_dir();
        let mut sessions = Vec::new();
        for name in session_names_in(&dir) {
            let paths = SessionPaths::new(&dir, &name);
            if let Some(record) = store::read_status(&paths.status_path) {
                sessions.push(self.view_for(record).await);
            }
        }
        sessions.sort_by(|a, b| b.status.started_at.cmp(&a.status.started_at));
        SessionList {
            available,
            platform: std::env::consts::OS.to_string(),
            sessions_dir: dir,
            sessions,
        }
    }

    /// Terminate a session and remove its record and files.
    ///
    /// Unknown names succeed as a no-op: the desired end state (nothing
    /// running, nothing recorded) already holds.
    pub async fn kill(
        &self,
        name: &str,
        signal: Option<Signal>,
    ) -> Result<KillOutcome, SessionError> {
        let name = required_name(name)?;
        let dir = self.sessions_dir();
        let paths = SessionPaths::new(&dir, &name);

        let Some(record) = store::read_status(&paths.status_path) else {
            let removed = remove_session_files(&paths, &dir);
            return Ok(KillOutcome {
                name: paths.name,
                pid: None,
                terminated: false,
                removed_record: removed,
            });
        };

        let runtime = self.locate_runtime(&record).await;
        if runtime.alive {
            ensure_verified(&record, &runtime)?;
            info!(session = %paths.name, pid = ?runtime.pid, "killing session");
            self.terminate(&paths.name, &runtime, signal.unwrap_or_default())
                .await?;
        }

        remove_session_files(&paths, &dir);
        Ok(KillOutcome {
            name: paths.name,
            pid: runtime.pid,
            terminated: runtime.alive,
            removed_record: true,
        })
    }

    /// Terminate a session but keep its record and log for inspection.
    pub async fn stop(
        &self,
        name: &str,
        signal: Option<Signal>,
    ) -> Result<StopOutcome, SessionError> {
        let name = required_name(name)?;
        let dir = self.sessions_dir();
        let paths = SessionPaths::new(&dir, &name);

        let Some(mut record) = store::read_status(&paths.status_path) else {
            return Ok(StopOutcome {
                name: paths.name,
                pid: None,
                terminated: false,
            });
        };

        let runtime = self.locate_runtime(&record).await;
        let graceful = signal.unwrap_or_default();
        if runtime.alive {
            ensure_verified(&record, &runtime)?;
            info!(session = %paths.name, pid = ?runtime.pid, "stopping session");
            self.terminate(&paths.name, &runtime, graceful).await?;
        }

        let now = Utc::now();
        record.pid = None;
        record.pgid = None;
        if record.exited_at.is_none() {
            record.exited_at = Some(now);
        }
        if runtime.alive && record.signal.is_none() {
            record.signal = Some(graceful.as_str().to_string());
        }
        record.updated_at = now;
        store::write_status(&paths.status_path, &record)?;

        Ok(StopOutcome {
            name: paths.name,
            pid: runtime.pid,
            terminated: runtime.alive,
        })
    }

    /// Kill then relaunch with the recorded command, cwd, and window.
    pub async fn restart(&self, name: &str) -> Result<SessionView, SessionError> {
        let name = required_name(name)?;
        let dir = self.sessions_dir();
        let paths = SessionPaths::new(&dir, &name);

        let record = store::read_status(&paths.status_path)
            .ok_or_else(|| SessionError::NotFound(paths.name.clone()))?;
        if record.command.trim().is_empty() {
            return Err(SessionError::MissingCommand(paths.name));
        }
        let request = StartRequest {
            name: paths.name.clone(),
            command: record.command.clone(),
            cwd: Some(record.cwd.clone()),
            window: record.window.clone(),
        };

        self.kill(&paths.name, None).await?;
        self.start(request).await
    }

    /// Kill every recorded session, continuing past individual failures.
    pub async fn kill_all(&self, signal: Option<Signal>) -> KillAllSummary {
        let dir = self.sessions_dir();
        let names = session_names_in(&dir);
        let mut summary = KillAllSummary {
            attempted: names.len(),
            ..Default::default()
        };
        for name in names {
            match self.kill(&name, signal).await {
                Ok(_) => summary.killed.push(name),
                Err(err) => {
                    warn!(session = %name, error = %err, "kill-all: session failed");
                    summary.errors.push(KillAllError {
                        name,
                        error: err.to_string(),
                    });
                }
            }
        }
        summary
    }

    /// Tail a session's captured output. `lines` and `max_bytes` are clamped
    /// to sane bounds rather than rejected.
    pub async fn read_log(
        &self,
        name: &str,
        lines: Option<usize>,
        max_bytes: Option<u64>,
    ) -> Result<LogSlice, SessionError> {
        let name = required_name(name)?;
        let dir = self.sessions_dir();
        let paths = SessionPaths::new(&dir, &name);

        if store::read_status(&paths.status_path).is_none() {
            return Err(SessionError::NotFound(paths.name));
        }

        let lines = lines.unwrap_or(DEFAULT_LOG_LINES).clamp(1, MAX_LOG_LINES);
        let max_bytes = max_bytes
            .unwrap_or(DEFAULT_LOG_BYTES)
            .clamp(MIN_LOG_BYTES, MAX_LOG_BYTES);
        let content = tail_lines(&paths.output_path, lines, max_bytes);
        let metadata = fs::metadata(&paths.output_path).ok();

        Ok(LogSlice {
            name: paths.name,
            lines,
            size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            mtime: metadata
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
            path: paths.output_path,
            content,
        })
    }

    async fn terminate(
        &self,
        name: &str,
        runtime: &LocatedRuntime,
        graceful: Signal,
    ) -> Result<(), SessionError> {
        terminate_session(
            self.control.as_ref(),
            name,
            runtime.pid,
            runtime.pgid,
            graceful,
            self.config.stop_timeout,
            self.config.poll_interval,
        )
        .await
    }

    /// Probe where the session actually lives right now: the recorded pids
    /// first, then a token scan when those are stale. When the recorded pid
    /// is alive, its command line is checked against the token; a mismatch
    /// means the pid was recycled to a stranger.
    async fn locate_runtime(&self, record: &SessionStatus) -> LocatedRuntime {
        let control = self.control.as_ref();
        if is_session_alive(control, record.pid, record.pgid).await {
            let verified = match (record.pid, record.token.as_deref()) {
                (Some(pid), Some(token)) => verify_pid_token(control, pid, token).await,
                _ => true,
            };
            return LocatedRuntime {
                pid: record.pid,
                pgid: record.pgid,
                alive: true,
                verified,
                recovered: false,
            };
        }
        if let Some(token) = record.token.as_deref() {
            if let Some(runtime) = resolve_runtime_from_token(control, token).await {
                return LocatedRuntime {
                    pid: Some(runtime.pid),
                    pgid: runtime.pgid,
                    alive: true,
                    verified: true,
                    recovered: true,
                };
            }
        }
        LocatedRuntime {
            pid: None,
            pgid: None,
            alive: false,
            verified: true,
            recovered: false,
        }
    }

    async fn view_for(&self, record: SessionStatus) -> SessionView {
        let mut runtime = self.locate_runtime(&record).await;
        if runtime.alive && !runtime.verified {
            // The recorded pid belongs to someone else now. For display,
            // that session is not running there; the token scan may still
            // find where it actually lives.
            runtime = match record
                .token
                .as_deref()
                .filter(|t| !t.trim().is_empty())
            {
                Some(token) => match resolve_runtime_from_token(self.control.as_ref(), token)
                    .await
                {
                    Some(found) => LocatedRuntime {
                        pid: Some(found.pid),
                        pgid: found.pgid,
                        alive: true,
                        verified: true,
                        recovered: true,
                    },
                    None => LocatedRuntime::dead(),
                },
                None => LocatedRuntime::dead(),
            };
        }

        let mut ports = ports::extract_ports_from_command(&record.command);
        if runtime.alive {
            // A log line shows where the server actually bound; the launch
            // command is only a guess when the log says nothing.
            let tail = tail_lines(&record.output_path, PORT_SCAN_LINES, PORT_SCAN_BYTES);
            let observed = ports::extract_ports_from_text(&tail);
            if !observed.is_empty() {
                ports = observed;
            }
        }

        SessionView {
            running: runtime.alive,
            resolved_pid: runtime.pid,
            resolved_pgid: runtime.pgid,
            recovered: runtime.recovered,
            port: ports.first().copied(),
            ports,
            status: record,
        }
    }
}

struct LocatedRuntime {
    pid: Option<i32>,
    pgid: Option<i32>,
    alive: bool,
    /// False only when the recorded pid is alive but carries a different
    /// command line than the token predicts.
    verified: bool,
    recovered: bool,
}

impl LocatedRuntime {
    fn dead() -> Self {
        Self {
            pid: None,
            pgid: None,
            alive: false,
            verified: true,
            recovered: false,
        }
    }
}

/// Identity gate for destructive paths: a token mismatch with actual
/// command-line evidence is a hard refusal, never a silent skip.
fn ensure_verified(record: &SessionStatus, runtime: &LocatedRuntime) -> Result<(), SessionError> {
    if runtime.verified {
        return Ok(());
    }
    let pid = runtime.pid.unwrap_or(-1);
    warn!(session = %record.name, pid, "token mismatch, refusing to signal");
    Err(SessionError::TokenMismatch {
        name: record.name.clone(),
        pid,
    })
}

fn required_name(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::NameRequired);
    }
    Ok(trimmed.to_string())
}

/// Session names present in the directory, from `<name>.status.json` files.
fn session_names_in(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let file_name = entry.ok()?.file_name();
            let file_name = file_name.to_str()?;
            file_name
                .strip_suffix(".status.json")
                .filter(|n| !n.is_empty())
                .map(str::to_string)
        })
        .collect();
    names.sort();
    names
}

/// Delete a session's file triple plus the atomic-write shadows. Only
/// paths inside the sessions directory are touched.
fn remove_session_files(paths: &SessionPaths, dir: &Path) -> bool {
    let mut removed = false;
    for path in [&paths.status_path, &paths.output_path, &paths.control_path] {
        if path.starts_with(dir) {
            removed |= store::safe_unlink(path);
        }
        let tmp = store::tmp_path(path);
        if tmp.starts_with(dir) {
            store::safe_unlink(&tmp);
        }
    }
    removed
}
