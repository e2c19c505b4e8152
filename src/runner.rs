//! Scraper process runner.
//!
//! Launches every scraper script in the configured directory as an
//! independent OS process and returns only once each one has reached a
//! terminal state. Supervision is event-driven: each child gets an async
//! supervisor that awaits its exit under a wall-clock timeout, requests
//! graceful termination (SIGTERM) when the timeout expires, and escalates
//! to SIGKILL after a grace period. A safety bound caps the whole run;
//! anything still alive past it is abandoned after a best-effort kill
//! (`kill_on_drop` on every child).
//!
//! Per-task state machine:
//!
//! ```text
//! PENDING → RUNNING → COMPLETED
//!                   → TIMED_OUT_TERMINATING → COMPLETED
//! ```
//!
//! No task re-enters RUNNING after leaving it. A script that fails to even
//! start (missing interpreter, permission error) is logged and skipped —
//! it never blocks the others.

use anyhow::{Context, Result};
use globset::Glob;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;

/// Terminal state of one launched script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The process exited on its own; non-zero codes are logged but treated
    /// identically to success for sequencing.
    Completed { script: String, code: Option<i32> },
    /// The process blew its wall-clock budget and was terminated.
    TimedOut { script: String },
}

/// Aggregate result of a runner pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub launched: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub spawn_failures: usize,
    /// Tasks still alive when the safety bound expired.
    pub abandoned: usize,
}

/// Discover the runnable scripts in `dir`: regular files matching the
/// script glob, excluding this orchestrator's own executable name so the
/// runner can never invoke itself. Sorted for a deterministic launch order.
pub fn discover_scripts(dir: &Path, script_glob: &str) -> Result<Vec<PathBuf>> {
    let matcher = Glob::new(script_glob)
        .with_context(|| format!("Invalid script glob: {}", script_glob))?
        .compile_matcher();

    let own_name = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()));

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list scraper directory: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if Some(&name) == own_name.as_ref() {
            continue;
        }
        if matcher.is_match(Path::new(&name)) {
            scripts.push(entry.path());
        }
    }

    scripts.sort();
    Ok(scripts)
}

/// Run every discovered script to a terminal state and report the tally.
///
/// Scripts inherit the orchestrator's working directory and environment and
/// receive no arguments. The call returns once every launched process has
/// exited or been killed. If the safety bound expires first, the stragglers
/// are abandoned and the call returns anyway.
pub async fn run_scripts(cfg: &ScraperConfig) -> Result<RunSummary> {
    let scripts = discover_scripts(&cfg.dir, &cfg.script_glob)?;

    if scripts.is_empty() {
        warn!(dir = %cfg.dir.display(), glob = %cfg.script_glob, "no scraper scripts found");
        return Ok(RunSummary::default());
    }

    let timeout = Duration::from_secs(cfg.timeout_secs);
    let grace = Duration::from_secs(cfg.grace_secs);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(cfg.safety_secs);

    let mut summary = RunSummary::default();
    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();

    for path in scripts {
        let script = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        // PENDING → RUNNING
        match Command::new(&cfg.interpreter)
            .arg(&path)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => {
                info!(%script, interpreter = %cfg.interpreter, "launched scraper");
                summary.launched += 1;
                tasks.spawn(supervise(script, child, timeout, grace));
            }
            Err(e) => {
                warn!(%script, error = %e, "failed to start scraper; skipping");
                summary.spawn_failures += 1;
            }
        }
    }

    // Drain supervisors, bounded by the safety window.
    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok(outcome))) => match outcome {
                TaskOutcome::Completed { script, code } => {
                    debug!(%script, ?code, "scraper completed");
                    summary.completed += 1;
                }
                TaskOutcome::TimedOut { script } => {
                    summary.timed_out += 1;
                    debug!(%script, "scraper terminated after timeout");
                }
            },
            Ok(Some(Err(e))) => {
                warn!(error = %e, "scraper supervisor panicked");
            }
            Ok(None) => break,
            Err(_) => {
                summary.abandoned = tasks.len();
                warn!(
                    abandoned = summary.abandoned,
                    "safety bound exceeded; abandoning remaining scrapers"
                );
                // Aborting drops each Child; kill_on_drop delivers the
                // best-effort forced kill.
                tasks.shutdown().await;
                break;
            }
        }
    }

    Ok(summary)
}

/// Supervise one child: wait for natural exit within `timeout`, otherwise
/// request graceful termination and escalate to a forceful kill after
/// `grace`. Always resolves to a terminal outcome.
async fn supervise(script: String, mut child: Child, timeout: Duration, grace: Duration) -> TaskOutcome {
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let code = status.code();
            if !status.success() {
                warn!(%script, ?code, "scraper exited non-zero");
            }
            TaskOutcome::Completed { script, code }
        }
        Ok(Err(e)) => {
            // The process is unreachable; nothing left to supervise.
            warn!(%script, error = %e, "failed to await scraper exit");
            TaskOutcome::Completed { script, code: None }
        }
        Err(_) => {
            // RUNNING → TIMED_OUT_TERMINATING
            warn!(%script, "timeout expired; terminating scraper");
            request_termination(&child);

            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                warn!(%script, "grace period expired; killing scraper");
                if let Err(e) = child.kill().await {
                    warn!(%script, error = %e, "forced kill failed");
                }
            }
            TaskOutcome::TimedOut { script }
        }
    }
}

/// Ask the child to terminate gracefully. SIGTERM on Unix; elsewhere the
/// closest available primitive is an immediate kill request.
fn request_termination(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        // No graceful signal on this platform; the grace period only
        // delays the forced kill.
        let _ = child;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    fn test_cfg(dir: &Path, timeout_secs: u64, grace_secs: u64, safety_secs: u64) -> ScraperConfig {
        ScraperConfig {
            dir: dir.to_path_buf(),
            interpreter: "/bin/sh".to_string(),
            script_glob: "*.sh".to_string(),
            source_globs: vec!["*.json".to_string()],
            combined_output: "data.json".to_string(),
            timeout_secs,
            grace_secs,
            safety_secs,
        }
    }

    #[test]
    fn discovery_filters_by_glob_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.sh"), "exit 0\n").unwrap();
        fs::write(tmp.path().join("a.sh"), "exit 0\n").unwrap();
        fs::write(tmp.path().join("data.json"), "[]").unwrap();
        fs::write(tmp.path().join("notes.txt"), "n/a").unwrap();

        let scripts = discover_scripts(tmp.path(), "*.sh").unwrap();
        let names: Vec<_> = scripts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.sh", "b.sh"]);
    }

    #[tokio::test]
    async fn well_behaved_scripts_all_complete() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("one.sh"), "exit 0\n").unwrap();
        fs::write(tmp.path().join("two.sh"), "exit 0\n").unwrap();

        let summary = run_scripts(&test_cfg(tmp.path(), 10, 2, 60)).await.unwrap();
        assert_eq!(summary.launched, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.timed_out, 0);
        assert_eq!(summary.spawn_failures, 0);
        assert_eq!(summary.abandoned, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_counts_as_completed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("fail.sh"), "exit 3\n").unwrap();

        let summary = run_scripts(&test_cfg(tmp.path(), 10, 2, 60)).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.timed_out, 0);
    }

    #[tokio::test]
    async fn runaway_script_is_terminated_within_bound() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("hang.sh"), "sleep 600\n").unwrap();

        let start = Instant::now();
        let summary = run_scripts(&test_cfg(tmp.path(), 1, 1, 60)).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.abandoned, 0);
        // Terminal within timeout + grace, with scheduling slack.
        assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn spawn_failure_does_not_block_the_rest() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("ok.sh"), "exit 0\n").unwrap();

        let mut cfg = test_cfg(tmp.path(), 10, 2, 60);
        cfg.interpreter = "/nonexistent/interpreter".to_string();

        let summary = run_scripts(&cfg).await.unwrap();
        assert_eq!(summary.spawn_failures, 1);
        assert_eq!(summary.launched, 0);
    }

    #[tokio::test]
    async fn empty_directory_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let summary = run_scripts(&test_cfg(tmp.path(), 10, 2, 60)).await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn mixed_batch_settles_with_zero_active_tasks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("quick.sh"), "exit 0\n").unwrap();
        fs::write(tmp.path().join("slow.sh"), "sleep 600\n").unwrap();

        let summary = run_scripts(&test_cfg(tmp.path(), 1, 1, 60)).await.unwrap();
        assert_eq!(summary.launched, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.abandoned, 0);
    }
}
