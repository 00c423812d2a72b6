use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_STOP_TIMEOUT_MS: u64 = 4000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Tunables for the supervisor.
///
/// `stop_timeout` bounds each phase of the graceful-to-forceful escalation,
/// so a failed termination attempt costs at most two timeout windows.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Explicit sessions root. When `None`, resolution falls back to
    /// `SESSIOND_SESSION_ROOT`, then the home directory, then the cwd.
    pub session_root: Option<PathBuf>,
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self {
            session_root: env::var("SESSIOND_SESSION_ROOT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            stop_timeout: Duration::from_millis(
                env::var("SESSIOND_STOP_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
            ),
            poll_interval: Duration::from_millis(
                env::var("SESSIOND_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        }
    }

    pub fn with_session_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.session_root = Some(root.into());
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
