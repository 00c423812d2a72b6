//! Safe on-disk identity for sessions: sanitized names, the per-session
//! file triple, and sessions-directory resolution.

use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

const MAX_NAME_LEN: usize = 64;
const STATE_SUBDIR: &str = ".sessiond";

/// The three files that make up a session on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub name: String,
    pub status_path: PathBuf,
    pub output_path: PathBuf,
    pub control_path: PathBuf,
}

impl SessionPaths {
    pub fn new(sessions_dir: &Path, name: &str) -> Self {
        let safe = sanitize_name(name);
        Self {
            status_path: sessions_dir.join(format!("{safe}.status.json")),
            output_path: sessions_dir.join(format!("{safe}.output.log")),
            control_path: sessions_dir.join(format!("{safe}.control.jsonl")),
            name: safe,
        }
    }
}

/// Restrict a raw session name to `[A-Za-z0-9_-]`, bounded length.
///
/// Total: an input that sanitizes to nothing gets a time-based fallback so
/// callers never have to handle an empty name.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        return fallback_name();
    }
    cleaned.chars().take(MAX_NAME_LEN).collect()
}

fn fallback_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    format!("sess_{}", to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_else(|_| "0".to_string())
}

/// Base directory under which session state lives: explicit override, then
/// `SESSIOND_SESSION_ROOT`, then the home directory, then the cwd.
pub fn resolve_base_root(session_root: Option<&Path>) -> PathBuf {
    if let Some(root) = session_root {
        return root.to_path_buf();
    }
    if let Ok(root) = env::var("SESSIOND_SESSION_ROOT") {
        let trimmed = root.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    if let Some(home) = dirs::home_dir() {
        return home;
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// The directory holding the per-session file triples.
pub fn resolve_sessions_dir(session_root: Option<&Path>) -> PathBuf {
    resolve_base_root(session_root)
        .join(STATE_SUBDIR)
        .join("sessions")
}
