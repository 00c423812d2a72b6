mod commands;

use clap::Parser;
use serde::Serialize;
use sessiond_core::SessionView;
use sessiond_core::StartRequest;
use sessiond_core::Supervisor;
use sessiond_core::SupervisorConfig;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;
use crate::commands::Commands;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> sessiond_core::Result<()> {
    let mut config = SupervisorConfig::from_env();
    if let Some(root) = &cli.root {
        config = config.with_session_root(root.clone());
    }
    let supervisor = Supervisor::new(config);
    let json = cli.json;

    match cli.command {
        Commands::Start {
            name,
            command,
            cwd,
            window,
        } => {
            let view = supervisor
                .start(StartRequest {
                    name,
                    command,
                    cwd,
                    window,
                })
                .await?;
            if json {
                print_json(&view);
            } else {
                println!("started {}", describe(&view));
            }
        }

        Commands::List => {
            let list = supervisor.list().await;
            if json {
                print_json(&list);
            } else if list.sessions.is_empty() {
                println!("no sessions in {}", list.sessions_dir.display());
            } else {
                for view in &list.sessions {
                    println!("{}", describe(view));
                }
            }
        }

        Commands::Kill { name, signal } => {
            let outcome = supervisor.kill(&name, signal).await?;
            if json {
                print_json(&outcome);
            } else if outcome.terminated {
                println!("killed {}", outcome.name);
            } else {
                println!("{}: nothing running, record removed", outcome.name);
            }
        }

        Commands::Stop { name, signal } => {
            let outcome = supervisor.stop(&name, signal).await?;
            if json {
                print_json(&outcome);
            } else if outcome.terminated {
                println!("stopped {}", outcome.name);
            } else {
                println!("{}: nothing running", outcome.name);
            }
        }

        Commands::Restart { name } => {
            let view = supervisor.restart(&name).await?;
            if json {
                print_json(&view);
            } else {
                println!("restarted {}", describe(&view));
            }
        }

        Commands::KillAll { signal } => {
            let summary = supervisor.kill_all(signal).await;
            if json {
                print_json(&summary);
            } else {
                println!("killed {} of {} sessions", summary.killed.len(), summary.attempted);
                for failure in &summary.errors {
                    eprintln!("  {}: {}", failure.name, failure.error);
                }
            }
            if !summary.errors.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Logs {
            name,
            lines,
            max_bytes,
        } => {
            let slice = supervisor.read_log(&name, lines, max_bytes).await?;
            if json {
                print_json(&slice);
            } else {
                println!("{}", slice.content);
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: failed to serialize output: {e}"),
    }
}

/// One human-readable status line per session.
fn describe(view: &SessionView) -> String {
    let state = if view.running {
        match view.resolved_pid {
            Some(pid) if view.recovered => format!("running (pid {pid}, recovered)"),
            Some(pid) => format!("running (pid {pid})"),
            None => "running".to_string(),
        }
    } else {
        match view.status.exit_code {
            Some(code) => format!("exited ({code})"),
            None => match &view.status.signal {
                Some(signal) => format!("exited ({signal})"),
                None => "not running".to_string(),
            },
        }
    };
    let ports = if view.ports.is_empty() {
        String::new()
    } else {
        let joined: Vec<String> = view.ports.iter().map(|p| p.to_string()).collect();
        format!(" [port {}]", joined.join(", "))
    };
    format!(
        "{}  {}{}  {}",
        view.status.name, state, ports, view.status.command
    )
}
