//! Durable JSON status records, written atomically so a concurrent reader
//! never observes a half-serialized file.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::error::SessionError;

/// One persisted record per session name.
///
/// `token` is set once at launch and never changes; it is the identity
/// credential consulted before any destructive signal, because pids are
/// recycled by the OS. A record with `pid == None` and `exited_at != None`
/// is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub name: String,
    pub pid: Option<i32>,
    pub pgid: Option<i32>,
    pub token: Option<String>,
    pub command: String,
    pub cwd: PathBuf,
    pub window: Option<String>,
    pub started_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub platform: String,
    pub output_path: PathBuf,
    pub control_path: PathBuf,
    pub status_path: PathBuf,
    pub updated_at: DateTime<Utc>,
}

/// Serialize and persist a status record via temp file + rename.
///
/// Rename is the only operation assumed atomic; nothing ever reads the
/// `.tmp` shadow.
pub fn write_status(path: &Path, status: &SessionStatus) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SessionError::Store {
            operation: "create_dir".to_string(),
            reason: e.to_string(),
        })?;
    }

    let mut payload =
        serde_json::to_string_pretty(status).map_err(|e| SessionError::Store {
            operation: "serialize".to_string(),
            reason: e.to_string(),
        })?;
    payload.push('\n');

    let tmp = tmp_path(path);
    fs::write(&tmp, payload).map_err(|e| SessionError::Store {
        operation: "write_tmp".to_string(),
        reason: format!("{}: {}", tmp.display(), e),
    })?;
    fs::rename(&tmp, path).map_err(|e| SessionError::Store {
        operation: "rename".to_string(),
        reason: format!("{} -> {}: {}", tmp.display(), path.display(), e),
    })
}

/// Tolerant read: a missing file, unreadable file, or invalid JSON all
/// yield `None`, never an error.
pub fn read_status(path: &Path) -> Option<SessionStatus> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

pub fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Best-effort unlink; reports whether a file was removed.
pub fn safe_unlink(path: &Path) -> bool {
    fs::remove_file(path).is_ok()
}
