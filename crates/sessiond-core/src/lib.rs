#![deny(clippy::all)]

//! Supervisor for long-running named OS processes ("sessions").
//!
//! Sessions are launched detached via the platform shell, with combined
//! stdout/stderr appended to a per-session log file and a crash-survivable
//! JSON status record on disk. The filesystem is the source of truth: every
//! operation re-derives state from status files and, when a recorded pid has
//! gone stale, from OS process scans keyed by the session's launch token.

mod config;
mod error;
mod launcher;
mod naming;
mod ports;
mod process;
mod pstree;
mod store;
mod supervisor;
mod tail;
mod terminate;

pub use config::SupervisorConfig;
pub use error::SessionError;
pub use launcher::StartRequest;
pub use launcher::StartedSession;
pub use naming::SessionPaths;
pub use naming::resolve_base_root;
pub use naming::resolve_sessions_dir;
pub use naming::sanitize_name;
pub use ports::extract_ports_from_command;
pub use ports::extract_ports_from_text;
pub use process::ProcessControl;
pub use process::ProcessEntry;
pub use process::Signal;
pub use process::native_control;
pub use pstree::ResolvedRuntime;
pub use store::SessionStatus;
pub use supervisor::KillAllError;
pub use supervisor::KillAllSummary;
pub use supervisor::KillOutcome;
pub use supervisor::LogSlice;
pub use supervisor::SessionList;
pub use supervisor::SessionView;
pub use supervisor::StopOutcome;
pub use supervisor::Supervisor;
pub use tail::tail_lines;

pub type Result<T> = std::result::Result<T, SessionError>;
