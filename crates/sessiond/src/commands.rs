use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use sessiond_core::Signal;

const LONG_ABOUT: &str = r#"sessiond supervises long-running named OS processes ("sessions").

Sessions are launched detached through the platform shell, with stdout and
stderr captured to a per-session log file and a JSON status record kept on
disk. Records survive supervisor restarts: a fresh sessiond can list, stop,
and kill sessions launched by a previous one.

EXAMPLES:
    # Launch a dev server as a named session
    sessiond start web "npm run dev"

    # See what is running (and which ports sessions listen on)
    sessiond list

    # Tail the captured output
    sessiond logs web --lines 100

    # Graceful stop (record kept), or kill (record removed)
    sessiond stop web
    sessiond kill web

    # Relaunch with the recorded command and working directory
    sessiond restart web"#;

#[derive(Parser)]
#[command(name = "sessiond")]
#[command(author, version)]
#[command(about = "Supervise long-running named processes")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Base directory for session state (default: $SESSIOND_SESSION_ROOT,
    /// then the home directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging (also respects RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Launch a named session
    #[command(long_about = r#"Launch a named session.

The command runs detached through the platform shell in its own process
group, so it survives sessiond exiting. An existing live session under the
same name is terminated first.

EXAMPLES:
    sessiond start web "npm run dev"
    sessiond start api "cargo run --release" --cwd ~/src/api"#)]
    Start {
        /// Session name (restricted to letters, digits, '-' and '_')
        name: String,

        /// Shell command to run
        command: String,

        /// Working directory for the session
        #[arg(short = 'd', long)]
        cwd: Option<PathBuf>,

        /// Free-form label stored with the session
        #[arg(long)]
        window: Option<String>,
    },

    /// List all recorded sessions with live status
    List,

    /// Terminate a session and remove its record and log
    Kill {
        /// Session name
        name: String,

        /// Graceful signal to try first (default SIGTERM); escalation to
        /// SIGKILL still applies
        #[arg(short, long)]
        signal: Option<Signal>,
    },

    /// Terminate a session but keep its record and log
    Stop {
        /// Session name
        name: String,

        /// Graceful signal to try first (default SIGTERM)
        #[arg(short, long)]
        signal: Option<Signal>,
    },

    /// Kill a session and relaunch it with its recorded command
    Restart {
        /// Session name
        name: String,
    },

    /// Terminate every recorded session
    KillAll {
        /// Graceful signal to try first (default SIGTERM)
        #[arg(short, long)]
        signal: Option<Signal>,
    },

    /// Show the tail of a session's captured output
    Logs {
        /// Session name
        name: String,

        /// Number of lines from the end (default 500, max 50000)
        #[arg(short = 'n', long)]
        lines: Option<usize>,

        /// Byte budget for the backward read (default 1MiB, max 4MiB)
        #[arg(long)]
        max_bytes: Option<u64>,
    },
}
