//! Process-tree expansion and token-based runtime recovery.
//!
//! A supervisor restart loses in-memory child handles, but the launch token
//! embedded in every session's command line survives in the process table.
//! Scanning for it recovers which pids still belong to a session, and the
//! `(pid, ppid)` snapshot recovers the descendants that must be signaled
//! alongside the leader.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use crate::process::ProcessControl;
use crate::process::ProcessEntry;

/// What a token scan recovered about a session's live processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRuntime {
    /// Best guess at the leader pid.
    pub pid: i32,
    /// Process group the matched pids belong to, when known.
    pub pgid: Option<i32>,
    /// Every pid whose command line carried the token.
    pub pids: Vec<i32>,
}

/// Expand `root` to itself plus all live descendants, ordered leaves-first
/// so signaling in order tears the tree down bottom-up.
pub async fn list_descendants(control: &dyn ProcessControl, root: i32) -> Vec<i32> {
    if root <= 0 {
        return Vec::new();
    }
    let snapshot = control.snapshot().await;
    if snapshot.is_empty() {
        return vec![root];
    }
    descendants_in_kill_order(&snapshot, root)
}

/// BFS from `root` over the `(pid, ppid)` snapshot, reversed.
pub(crate) fn descendants_in_kill_order(snapshot: &[ProcessEntry], root: i32) -> Vec<i32> {
    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    for entry in snapshot {
        children.entry(entry.ppid).or_default().push(entry.pid);
    }

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if !visited.insert(pid) {
            continue;
        }
        order.push(pid);
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }
    order.reverse();
    order
}

/// Pids whose command line carries `token`, excluding this process itself
/// (the scan subprocess may briefly show the token in its own arguments).
pub async fn find_pids_by_token(control: &dyn ProcessControl, token: &str) -> Vec<i32> {
    let token = token.trim();
    if token.is_empty() {
        return Vec::new();
    }
    let own = std::process::id() as i32;
    control
        .pids_with_command_containing(token)
        .await
        .into_iter()
        .filter(|pid| *pid != own)
        .collect()
}

/// Recover a session's runtime from its token after the original pid record
/// went stale. Filters matches down to the live ones, groups them by pgid,
/// and picks the group most plausibly holding the session.
pub async fn resolve_runtime_from_token(
    control: &dyn ProcessControl,
    token: &str,
) -> Option<ResolvedRuntime> {
    let matches = find_pids_by_token(control, token).await;
    if matches.is_empty() {
        return None;
    }

    let mut live: Vec<(i32, Option<i32>)> = Vec::new();
    for pid in matches {
        if control.pid_alive(pid).await {
            live.push((pid, control.group_of(pid).await));
        }
    }
    pick_runtime(&live)
}

/// Choose among live `(pid, pgid)` matches: the largest process group wins,
/// ties broken by the smallest group key so the choice is deterministic.
/// The leader is the group id itself when a member carries it (the `setsid`
/// leader has pid == pgid), otherwise the lowest pid in the group.
pub(crate) fn pick_runtime(live: &[(i32, Option<i32>)]) -> Option<ResolvedRuntime> {
    if live.is_empty() {
        return None;
    }

    // Group key: pgid when known, the pid's own value otherwise so
    // groupless matches still form singleton candidates.
    let mut groups: HashMap<i32, (Option<i32>, Vec<i32>)> = HashMap::new();
    for &(pid, pgid) in live {
        let key = pgid.unwrap_or(pid);
        let entry = groups.entry(key).or_insert((pgid, Vec::new()));
        if pgid.is_some() {
            entry.0 = pgid;
        }
        entry.1.push(pid);
    }

    let (_, (pgid, mut pids)) = groups
        .into_iter()
        .max_by(|(key_a, (_, pids_a)), (key_b, (_, pids_b))| {
            pids_a
                .len()
                .cmp(&pids_b.len())
                .then_with(|| key_b.cmp(key_a))
        })?;
    pids.sort_unstable();
    pids.dedup();

    let leader = match pgid {
        Some(pgid) if pids.contains(&pgid) => pgid,
        _ => *pids.first()?,
    };
    Some(ResolvedRuntime {
        pid: leader,
        pgid,
        pids,
    })
}
