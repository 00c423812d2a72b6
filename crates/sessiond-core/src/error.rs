//! Error taxonomy for supervisor operations.
//!
//! Safety-relevant failures (token mismatch, escalation timeout, validation)
//! always reach the caller. Advisory paths such as port sniffing or process
//! tree expansion never surface here; they degrade to empty results.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session name is required")]
    NameRequired,
    #[error("session \"{0}\" has no command")]
    MissingCommand(String),
    #[error("session \"{0}\" is not found")]
    NotFound(String),
    #[error("refusing to signal pid {pid}: token mismatch (session={name})")]
    TokenMismatch { name: String, pid: i32 },
    #[error("failed to stop session {name} (pid={})", pid.map(|p| p.to_string()).unwrap_or_else(|| "n/a".into()))]
    StopTimeout { name: String, pid: Option<i32> },
    #[error("failed to start session \"{name}\": {reason}")]
    SpawnFailed { name: String, reason: String },
    #[error("failed to open output file for session \"{name}\": {reason}")]
    OutputLog { name: String, reason: String },
    #[error("status store error during {operation}: {reason}")]
    Store { operation: String, reason: String },
}

impl SessionError {
    /// Whether the error indicates a safety refusal rather than an
    /// environmental failure. Callers may use this to avoid retrying
    /// destructive operations that were rejected on identity grounds.
    pub fn is_refusal(&self) -> bool {
        matches!(self, SessionError::TokenMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_mismatch_display() {
        let err = SessionError::TokenMismatch {
            name: "build".into(),
            pid: 4242,
        };
        assert_eq!(
            err.to_string(),
            "refusing to signal pid 4242: token mismatch (session=build)"
        );
        assert!(err.is_refusal());
    }

    #[test]
    fn test_stop_timeout_display_without_pid() {
        let err = SessionError::StopTimeout {
            name: "web".into(),
            pid: None,
        };
        assert_eq!(err.to_string(), "failed to stop session web (pid=n/a)");
    }

    #[test]
    fn test_stop_timeout_display_with_pid() {
        let err = SessionError::StopTimeout {
            name: "web".into(),
            pid: Some(99),
        };
        assert_eq!(err.to_string(), "failed to stop session web (pid=99)");
        assert!(!err.is_refusal());
    }

    #[test]
    fn test_not_found_display() {
        let err = SessionError::NotFound("dev".into());
        assert_eq!(err.to_string(), "session \"dev\" is not found");
    }
}
