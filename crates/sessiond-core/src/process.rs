//! Platform process control: liveness probes, command-line queries, process
//! snapshots, and signal delivery.
//!
//! The capability surface is a trait with one implementation per platform,
//! selected once at startup. POSIX goes through `kill(2)` and `ps`; Windows
//! goes through `powershell` and `taskkill`. All queries are best-effort:
//! an unavailable tool degrades to empty results, never an error.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// Signals the supervisor is willing to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    #[default]
    Term,
    Int,
    Quit,
    Hup,
    Kill,
}

impl Signal {
    /// Parse a signal name, with or without the `SIG` prefix, case-insensitive.
    pub fn from_name(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        let raw = normalized.strip_prefix("SIG").unwrap_or(&normalized);
        match raw {
            "TERM" => Some(Signal::Term),
            "INT" => Some(Signal::Int),
            "QUIT" => Some(Signal::Quit),
            "HUP" => Some(Signal::Hup),
            "KILL" => Some(Signal::Kill),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Term => "SIGTERM",
            Signal::Int => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Hup => "SIGHUP",
            Signal::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Int => libc::SIGINT,
            Signal::Quit => libc::SIGQUIT,
            Signal::Hup => libc::SIGHUP,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Signal::from_name(value).ok_or_else(|| format!("unknown signal: {value}"))
    }
}

/// One row of the system process snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub ppid: i32,
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Non-destructive signal-0 probe. Permission denied counts as alive:
    /// the process exists, it just belongs to someone else.
    async fn pid_alive(&self, pid: i32) -> bool;

    /// Signal-0 probe against a process group. Always false on Windows.
    async fn group_alive(&self, pgid: i32) -> bool;

    async fn signal_pid(&self, pid: i32, signal: Signal) -> bool;

    async fn signal_group(&self, pgid: i32, signal: Signal) -> bool;

    /// Forceful whole-tree kill for platforms without process groups.
    async fn force_kill_tree(&self, pid: i32) -> bool;

    /// The process's command line, or empty when it cannot be obtained.
    async fn command_line(&self, pid: i32) -> String;

    /// A richer command-line variant that includes the environment where
    /// the platform exposes it. Falls back to the plain command line.
    async fn command_line_with_env(&self, pid: i32) -> String;

    /// Full `(pid, ppid)` snapshot; empty when unavailable.
    async fn snapshot(&self) -> Vec<ProcessEntry>;

    /// Pids whose command line contains `needle`; empty when unavailable.
    async fn pids_with_command_containing(&self, needle: &str) -> Vec<i32>;

    /// Process-group id of `pid`, where the platform has groups.
    async fn group_of(&self, pid: i32) -> Option<i32>;
}

/// The process control implementation for the current platform.
pub fn native_control() -> std::sync::Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        std::sync::Arc::new(PosixProcessControl)
    }
    #[cfg(windows)]
    {
        std::sync::Arc::new(WindowsProcessControl)
    }
}

/// `pid` OR `pgid` probe, the liveness notion used everywhere: a session
/// counts as alive while its leader or any of its group survives.
pub async fn is_session_alive(
    control: &dyn ProcessControl,
    pid: Option<i32>,
    pgid: Option<i32>,
) -> bool {
    if let Some(pid) = pid {
        if control.pid_alive(pid).await {
            return true;
        }
    }
    if let Some(pgid) = pgid {
        if control.group_alive(pgid).await {
            return true;
        }
    }
    false
}

/// Confirm that `pid` still runs the command it was launched as, by checking
/// the launch token against its command line.
///
/// Fails open: when no command line can be obtained at all there is no
/// counter-evidence, and recorded history still entitles the operation. A
/// mismatch with evidence is the one outcome that must block a signal.
pub async fn verify_pid_token(control: &dyn ProcessControl, pid: i32, token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return true;
    }
    let cmdline = control.command_line(pid).await;
    if cmdline.is_empty() {
        return true;
    }
    if cmdline.contains(token) {
        return true;
    }
    let enriched = control.command_line_with_env(pid).await;
    if enriched.is_empty() {
        return true;
    }
    enriched.contains(token)
}

async fn exec_text(program: &str, args: &[&str]) -> String {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).into_owned(),
        Err(_) => String::new(),
    }
}

#[cfg(unix)]
pub struct PosixProcessControl;

#[cfg(unix)]
fn kill_probe(target: libc::pid_t) -> bool {
    if unsafe { libc::kill(target, 0) } == 0 {
        return true;
    }
    matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::EPERM) | Some(libc::EACCES)
    )
}

#[cfg(unix)]
#[async_trait]
impl ProcessControl for PosixProcessControl {
    async fn pid_alive(&self, pid: i32) -> bool {
        pid > 0 && kill_probe(pid)
    }

    async fn group_alive(&self, pgid: i32) -> bool {
        pgid > 0 && kill_probe(-pgid)
    }

    async fn signal_pid(&self, pid: i32, signal: Signal) -> bool {
        pid > 0 && unsafe { libc::kill(pid, signal.raw()) } == 0
    }

    async fn signal_group(&self, pgid: i32, signal: Signal) -> bool {
        pgid > 0 && unsafe { libc::kill(-pgid, signal.raw()) } == 0
    }

    async fn force_kill_tree(&self, _pid: i32) -> bool {
        // Escalation through signal_group/signal_pid covers POSIX.
        false
    }

    async fn command_line(&self, pid: i32) -> String {
        if pid <= 0 {
            return String::new();
        }
        let pid_arg = pid.to_string();
        exec_text("ps", &["-o", "command=", "-ww", "-p", &pid_arg])
            .await
            .trim()
            .to_string()
    }

    async fn command_line_with_env(&self, pid: i32) -> String {
        if pid <= 0 {
            return String::new();
        }
        let pid_arg = pid.to_string();
        let attempts: [&[&str]; 3] = [
            &["eww", "-p", &pid_arg, "-o", "command="],
            &["eww", "-o", "command=", "-p", &pid_arg],
            &["eww", "-p", &pid_arg],
        ];
        for args in attempts {
            let text = exec_text("ps", args).await.trim().to_string();
            if !text.is_empty() {
                return text;
            }
        }
        String::new()
    }

    async fn snapshot(&self) -> Vec<ProcessEntry> {
        for program in ["/bin/ps", "ps"] {
            let text = exec_text(program, &["-ax", "-o", "pid=,ppid="]).await;
            let entries = parse_pid_ppid(&text);
            if !entries.is_empty() {
                return entries;
            }
        }
        Vec::new()
    }

    async fn pids_with_command_containing(&self, needle: &str) -> Vec<i32> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Vec::new();
        }
        // Quick pass over plain command lines, then the env-inclusive
        // variants for tokens that only live in the environment.
        let quick: [(&str, &[&str]); 2] = [
            ("ps", &["-ax", "-o", "pid=,command=", "-ww"]),
            ("/bin/ps", &["-ax", "-o", "pid=,command=", "-ww"]),
        ];
        let enriched: [(&str, &[&str]); 4] = [
            ("ps", &["eww", "-ax"]),
            ("/bin/ps", &["eww", "-ax"]),
            ("ps", &["eww", "-ax", "-o", "pid=,command="]),
            ("/bin/ps", &["eww", "-ax", "-o", "pid=,command="]),
        ];
        for (program, args) in quick.iter().chain(enriched.iter()) {
            let pids = pids_matching(&exec_text(program, args).await, needle);
            if !pids.is_empty() {
                return pids;
            }
        }
        Vec::new()
    }

    async fn group_of(&self, pid: i32) -> Option<i32> {
        if pid <= 0 {
            return None;
        }
        let pid_arg = pid.to_string();
        let text = exec_text("ps", &["-o", "pgid=", "-p", &pid_arg]).await;
        let parsed: i32 = text.trim().parse().ok()?;
        (parsed > 0).then_some(parsed)
    }
}

#[cfg(windows)]
pub struct WindowsProcessControl;

#[cfg(windows)]
#[async_trait]
impl ProcessControl for WindowsProcessControl {
    async fn pid_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        let script = format!("(Get-Process -Id {pid} -ErrorAction SilentlyContinue) -ne $null");
        exec_text("powershell", &["-NoProfile", "-Command", &script])
            .await
            .trim()
            .eq_ignore_ascii_case("true")
    }

    async fn group_alive(&self, _pgid: i32) -> bool {
        // No process groups on Windows, by platform contract.
        false
    }

    async fn signal_pid(&self, pid: i32, signal: Signal) -> bool {
        if pid <= 0 {
            return false;
        }
        let pid_arg = pid.to_string();
        let status = if signal == Signal::Kill {
            Command::new("taskkill")
                .args(["/pid", &pid_arg, "/T", "/F"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
        } else {
            Command::new("taskkill")
                .args(["/pid", &pid_arg, "/T"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
        };
        status.map(|s| s.success()).unwrap_or(false)
    }

    async fn signal_group(&self, _pgid: i32, _signal: Signal) -> bool {
        false
    }

    async fn force_kill_tree(&self, pid: i32) -> bool {
        self.signal_pid(pid, Signal::Kill).await
    }

    async fn command_line(&self, pid: i32) -> String {
        if pid <= 0 {
            return String::new();
        }
        let script =
            format!("(Get-CimInstance Win32_Process -Filter 'ProcessId={pid}').CommandLine");
        exec_text("powershell", &["-NoProfile", "-Command", &script])
            .await
            .trim()
            .to_string()
    }

    async fn command_line_with_env(&self, pid: i32) -> String {
        self.command_line(pid).await
    }

    async fn snapshot(&self) -> Vec<ProcessEntry> {
        let script = "Get-CimInstance Win32_Process | \
                      ForEach-Object { \"$($_.ProcessId) $($_.ParentProcessId)\" }";
        parse_pid_ppid(&exec_text("powershell", &["-NoProfile", "-Command", script]).await)
    }

    async fn pids_with_command_containing(&self, needle: &str) -> Vec<i32> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Vec::new();
        }
        let escaped = needle.replace('\'', "''");
        let script = format!(
            "Get-CimInstance Win32_Process | \
             Where-Object {{ $_.CommandLine -like '*{escaped}*' }} | \
             Select-Object -ExpandProperty ProcessId"
        );
        let text = exec_text("powershell", &["-NoProfile", "-Command", &script]).await;
        let mut pids: Vec<i32> = text
            .split_whitespace()
            .filter_map(|v| v.parse::<i32>().ok())
            .filter(|v| *v > 0)
            .collect();
        pids.dedup();
        pids
    }

    async fn group_of(&self, _pid: i32) -> Option<i32> {
        None
    }
}

/// Parse `pid ppid` pairs, one per line, ignoring anything malformed.
pub(crate) fn parse_pid_ppid(text: &str) -> Vec<ProcessEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid: i32 = parts.next()?.parse().ok()?;
            let ppid: i32 = parts.next()?.parse().ok()?;
            (pid > 0 && ppid >= 0).then_some(ProcessEntry { pid, ppid })
        })
        .collect()
}

/// Extract leading pids from `pid command` lines whose text contains `needle`.
pub(crate) fn pids_matching(text: &str, needle: &str) -> Vec<i32> {
    let mut seen = std::collections::HashSet::new();
    let mut pids = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains(needle) {
            continue;
        }
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };
        let Ok(pid) = first.parse::<i32>() else {
            continue;
        };
        if pid > 0 && seen.insert(pid) {
            pids.push(pid);
        }
    }
    pids
}
