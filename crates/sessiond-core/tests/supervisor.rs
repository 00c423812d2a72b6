//! End-to-end supervisor tests against real child processes.
//!
//! Everything here launches through the platform shell, so the suite is
//! POSIX-only and skips quietly when `ps` is unavailable.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use sessiond_core::native_control;
use sessiond_core::SessionError;
use sessiond_core::SessionStatus;
use sessiond_core::StartRequest;
use sessiond_core::Supervisor;
use sessiond_core::SupervisorConfig;
use tempfile::TempDir;

fn supervisor_in(root: &TempDir) -> Supervisor {
    let config = SupervisorConfig::from_env()
        .with_session_root(root.path())
        .with_stop_timeout(Duration::from_secs(3))
        .with_poll_interval(Duration::from_millis(50));
    Supervisor::new(config)
}

fn request(name: &str, command: &str) -> StartRequest {
    StartRequest {
        name: name.to_string(),
        command: command.to_string(),
        cwd: None,
        window: None,
    }
}

async fn ps_available() -> bool {
    let control = native_control();
    !control.command_line(std::process::id() as i32).await.is_empty()
}

async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    predicate()
}

fn rewrite_record(path: &Path, record: &SessionStatus) {
    let payload = serde_json::to_string_pretty(record).unwrap();
    fs::write(path, payload).unwrap();
}

#[tokio::test]
async fn test_start_list_kill_lifecycle() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    let view = supervisor.start(request("worker", "sleep 30")).await.unwrap();
    assert_eq!(view.status.name, "worker");
    assert!(view.status.pid.is_some());
    assert!(view.running);

    let list = supervisor.list().await;
    assert!(list.available);
    assert_eq!(list.sessions.len(), 1);
    assert_eq!(list.sessions[0].status.name, "worker");
    assert!(list.sessions[0].running);

    let outcome = supervisor.kill("worker", None).await.unwrap();
    assert!(outcome.terminated);
    assert!(outcome.removed_record);

    let list = supervisor.list().await;
    assert!(list.sessions.is_empty());
    assert!(!view.status.status_path.exists());
    assert!(!view.status.output_path.exists());
}

#[tokio::test]
async fn test_stop_preserves_record_and_log() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    let view = supervisor
        .start(request("svc", "echo starting; sleep 30"))
        .await
        .unwrap();
    assert!(view.running);

    let log_path = view.status.output_path.clone();
    let flushed = wait_until(
        || {
            fs::read_to_string(&log_path)
                .map(|s| s.contains("starting"))
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(flushed, "child output never reached the log file");

    let outcome = supervisor.stop("svc", None).await.unwrap();
    assert!(outcome.terminated);

    let list = supervisor.list().await;
    assert_eq!(list.sessions.len(), 1);
    let stopped = &list.sessions[0];
    assert!(!stopped.running);
    assert!(stopped.status.pid.is_none());
    assert!(stopped.status.exited_at.is_some());

    // The log survives the stop for post-mortem reads.
    let slice = supervisor.read_log("svc", None, None).await.unwrap();
    assert!(slice.content.contains("starting"));
}

#[tokio::test]
async fn test_kill_refuses_on_token_mismatch() {
    if !ps_available().await {
        return;
    }
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    // A decoy process standing in for a recycled pid: alive, but its
    // command line does not carry the recorded token.
    let mut decoy = std::process::Command::new("sleep").arg("30").spawn().unwrap();

    let dir = supervisor.sessions_dir();
    fs::create_dir_all(&dir).unwrap();
    let status_path = dir.join("forged.status.json");
    let now = chrono::Utc::now();
    let record = SessionStatus {
        name: "forged".to_string(),
        pid: Some(decoy.id() as i32),
        // No recorded group: the group fallback must not fire against
        // the test harness's own process group.
        pgid: None,
        token: Some("token-that-no-process-carries".to_string()),
        command: "sleep 30".to_string(),
        cwd: std::env::temp_dir(),
        window: None,
        started_at: now,
        exited_at: None,
        exit_code: None,
        signal: None,
        platform: std::env::consts::OS.to_string(),
        output_path: dir.join("forged.output.log"),
        control_path: dir.join("forged.control.jsonl"),
        status_path: status_path.clone(),
        updated_at: now,
    };
    rewrite_record(&status_path, &record);

    let err = supervisor.kill("forged", None).await.unwrap_err();
    assert!(matches!(err, SessionError::TokenMismatch { pid, .. } if pid == decoy.id() as i32));
    assert!(err.is_refusal());

    // The refused kill left the decoy untouched.
    let control = native_control();
    assert!(control.pid_alive(decoy.id() as i32).await);

    decoy.kill().unwrap();
    let _ = decoy.wait();
}

#[tokio::test]
async fn test_recovery_after_stale_pid() {
    if !ps_available().await {
        return;
    }
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    let view = supervisor.start(request("lost", "sleep 30")).await.unwrap();
    let token = view.status.token.clone().unwrap();

    // Simulate a supervisor restart that recorded a pid since recycled
    // away: the record goes stale but the token still lives in the real
    // child's command line.
    let mut record = view.status.clone();
    record.pid = Some(999_999_999);
    record.pgid = None;
    rewrite_record(&record.status_path, &record);

    let list = supervisor.list().await;
    let recovered = &list.sessions[0];
    assert!(recovered.running, "token scan should find the live session");
    assert!(recovered.recovered);
    assert!(recovered.resolved_pid.is_some());
    assert_ne!(recovered.resolved_pid, Some(999_999_999));

    let outcome = supervisor.kill("lost", None).await.unwrap();
    assert!(outcome.terminated);

    // Nothing carrying the token survives the kill.
    let control = native_control();
    let leftover = control.pids_with_command_containing(&token).await;
    assert!(
        leftover.iter().all(|p| *p == std::process::id() as i32),
        "unexpected survivors: {leftover:?}"
    );
}

#[tokio::test]
async fn test_escalation_kills_term_ignoring_session() {
    let root = TempDir::new().unwrap();
    let config = SupervisorConfig::from_env()
        .with_session_root(root.path())
        .with_stop_timeout(Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(50));
    let supervisor = Supervisor::new(config);

    supervisor
        .start(request(
            "stubborn",
            "trap '' TERM; while true; do sleep 0.2; done",
        ))
        .await
        .unwrap();

    // SIGTERM is ignored, so only the SIGKILL phase can end this one.
    let outcome = supervisor.stop("stubborn", None).await.unwrap();
    assert!(outcome.terminated);

    let list = supervisor.list().await;
    assert!(!list.sessions[0].running);
}

#[tokio::test]
async fn test_unknown_session_operations_are_noops() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    let kill = supervisor.kill("ghost", None).await.unwrap();
    assert!(!kill.terminated);
    assert!(!kill.removed_record);

    let stop = supervisor.stop("ghost", None).await.unwrap();
    assert!(!stop.terminated);

    let err = supervisor.read_log("ghost", None, None).await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound(name) if name == "ghost"));

    assert!(matches!(
        supervisor.kill("  ", None).await.unwrap_err(),
        SessionError::NameRequired
    ));
}

#[tokio::test]
async fn test_read_log_returns_recent_output() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    supervisor
        .start(request("printer", "printf 'one\\ntwo\\nthree\\n'"))
        .await
        .unwrap();

    let dir = supervisor.sessions_dir();
    let log_path = dir.join("printer.output.log");
    let flushed = wait_until(
        || {
            fs::read_to_string(&log_path)
                .map(|s| s.contains("three"))
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(flushed, "child output never reached the log file");

    let slice = supervisor.read_log("printer", Some(2), None).await.unwrap();
    assert_eq!(slice.content, "two\nthree");
    assert_eq!(slice.lines, 2);

    // Requests are clamped, not rejected.
    let slice = supervisor.read_log("printer", Some(0), None).await.unwrap();
    assert_eq!(slice.lines, 1);
}

#[tokio::test]
async fn test_restart_launches_fresh_process() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    let first = supervisor.start(request("loop", "sleep 30")).await.unwrap();
    let restarted = supervisor.restart("loop").await.unwrap();

    assert!(restarted.running);
    assert_eq!(restarted.status.command, "sleep 30");
    assert_ne!(restarted.status.token, first.status.token);

    assert!(matches!(
        supervisor.restart("never-started").await.unwrap_err(),
        SessionError::NotFound(_)
    ));

    supervisor.kill("loop", None).await.unwrap();
}

#[tokio::test]
async fn test_kill_all_sweeps_every_session() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    supervisor.start(request("one", "sleep 30")).await.unwrap();
    supervisor.start(request("two", "sleep 30")).await.unwrap();

    let summary = supervisor.kill_all(None).await;
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.killed, vec!["one", "two"]);
    assert!(summary.errors.is_empty());

    assert!(supervisor.list().await.sessions.is_empty());
}

#[tokio::test]
async fn test_exit_metadata_lands_in_record() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    supervisor.start(request("oneshot", "exit 7")).await.unwrap();

    let dir = supervisor.sessions_dir();
    let status_path = dir.join("oneshot.status.json");
    let reaped = wait_until(
        || {
            fs::read_to_string(&status_path)
                .ok()
                .and_then(|raw| serde_json::from_str::<SessionStatus>(&raw).ok())
                .map(|record| record.exited_at.is_some())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(reaped, "exit never recorded");

    let record: SessionStatus =
        serde_json::from_str(&fs::read_to_string(&status_path).unwrap()).unwrap();
    assert_eq!(record.exit_code, Some(7));
    assert!(record.pid.is_none());
    assert!(record.pgid.is_none());
}

#[tokio::test]
async fn test_port_sniffing_from_command() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    let view = supervisor
        .start(request("web", "sleep 30 --port 4100"))
        .await
        .unwrap();
    assert_eq!(view.port, Some(4100));
    assert!(view.ports.contains(&4100));

    supervisor.kill("web", None).await.unwrap();
}

#[tokio::test]
async fn test_log_ports_replace_command_ports_while_alive() {
    let root = TempDir::new().unwrap();
    let supervisor = supervisor_in(&root);

    // The command mentions one port but the server announces another;
    // while alive, the announced one is the truth.
    let view = supervisor
        .start(request(
            "announcer",
            "echo ready on http://localhost:5055; sleep 30 # --port 4100",
        ))
        .await
        .unwrap();

    let log_path = view.status.output_path.clone();
    let flushed = wait_until(
        || {
            fs::read_to_string(&log_path)
                .map(|s| s.contains("5055"))
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(flushed, "child output never reached the log file");

    let list = supervisor.list().await;
    let live = &list.sessions[0];
    assert!(live.running);
    assert_eq!(live.ports, vec![5055]);
    assert_eq!(live.port, Some(5055));

    supervisor.kill("announcer", None).await.unwrap();
}
