//! Isolated stage invocation.
//!
//! Each stage runs as a subprocess of the pipeline binary so an unhandled
//! fault in stage logic cannot corrupt the orchestrator's own state. The
//! stage's stdout/stderr go to a run-scoped log file, never interleaved
//! with orchestrator output. Every invocation carries a wall-clock
//! timeout; on expiry the child is killed and the step is marked failed
//! rather than left hanging.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use strataflow_shared::{StageOutcome, StepResult, StrataflowError};

use crate::stage::Stage;

/// Everything needed to invoke one stage as a subprocess.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub stage: Stage,
    /// Binary to execute (normally the current executable).
    pub program: PathBuf,
    /// Arguments, starting with the stage subcommand.
    pub args: Vec<String>,
    /// Log file capturing the child's stdout and stderr.
    pub log_path: PathBuf,
    pub timeout: Duration,
}

/// Run one stage to completion and return its finalized step result.
///
/// Never returns an error: spawn failures, non-zero exits, timeouts, and
/// interrupts all become a `Failed` step with details, so the orchestrator
/// always has a truthful record to summarize.
pub async fn run_stage(invocation: &StageInvocation) -> StepResult {
    let started = Utc::now();
    let timer = Instant::now();
    let name = invocation.stage.name();

    info!(stage = name, log = %invocation.log_path.display(), "invoking stage");

    let (outcome, exit_code, details) = match spawn_and_wait(invocation).await {
        Ok(StageExit::Completed(code)) if code == 0 => (StageOutcome::Succeeded, Some(0), None),
        Ok(StageExit::Completed(code)) => (
            StageOutcome::Failed,
            Some(code),
            Some(format!(
                "stage exited with code {code} (see {})",
                invocation.log_path.display()
            )),
        ),
        Ok(StageExit::TimedOut) => {
            let err = StrataflowError::Timeout {
                stage: name.into(),
                limit: invocation.timeout,
            };
            (StageOutcome::Failed, None, Some(err.to_string()))
        }
        Ok(StageExit::Interrupted) => (
            StageOutcome::Failed,
            None,
            Some("interrupted: shutdown signal received, stage killed".into()),
        ),
        Err(err) => (StageOutcome::Failed, None, Some(err.to_string())),
    };

    if let Some(detail) = &details {
        warn!(stage = name, detail = %detail, "stage did not succeed");
    }

    StepResult {
        name: name.into(),
        outcome,
        started_utc: started,
        ended_utc: Utc::now(),
        duration_s: timer.elapsed().as_secs_f64(),
        exit_code,
        details,
        log_path: Some(invocation.log_path.clone()),
    }
}

enum StageExit {
    Completed(i32),
    TimedOut,
    Interrupted,
}

async fn spawn_and_wait(
    invocation: &StageInvocation,
) -> Result<StageExit, StrataflowError> {
    let log_file = std::fs::File::create(&invocation.log_path)
        .map_err(|e| StrataflowError::io(&invocation.log_path, e))?;
    let log_err = log_file
        .try_clone()
        .map_err(|e| StrataflowError::io(&invocation.log_path, e))?;

    let mut child = tokio::process::Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|e| StrataflowError::io(&invocation.program, e))?;

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| StrataflowError::io(&invocation.program, e))?;
            Ok(StageExit::Completed(status.code().unwrap_or(-1)))
        }
        _ = tokio::time::sleep(invocation.timeout) => {
            kill_child(&mut child).await;
            Ok(StageExit::TimedOut)
        }
        _ = tokio::signal::ctrl_c() => {
            // Cooperative cancellation: kill at the process boundary and
            // never roll back committed ingestion state.
            kill_child(&mut child).await;
            Ok(StageExit::Interrupted)
        }
    }
}

async fn kill_child(child: &mut tokio::process::Child) {
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill stage subprocess");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str], dir: &std::path::Path) -> StageInvocation {
        StageInvocation {
            stage: Stage::Ingest,
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            log_path: dir.join("ingest.log"),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn successful_command_succeeds_with_captured_output() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation("sh", &["-c", "echo stage output"], dir.path());

        let step = run_stage(&inv).await;
        assert!(step.outcome.is_succeeded());
        assert_eq!(step.exit_code, Some(0));
        let log = std::fs::read_to_string(&inv.log_path).unwrap();
        assert!(log.contains("stage output"));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation("sh", &["-c", "echo boom >&2; exit 3"], dir.path());

        let step = run_stage(&inv).await;
        assert!(step.outcome.is_failed());
        assert_eq!(step.exit_code, Some(3));
        assert!(step.details.as_deref().unwrap().contains("code 3"));
        // stderr captured into the same log artifact.
        let log = std::fs::read_to_string(&inv.log_path).unwrap();
        assert!(log.contains("boom"));
    }

    #[tokio::test]
    async fn timeout_kills_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = invocation("sh", &["-c", "sleep 30"], dir.path());
        inv.timeout = Duration::from_millis(100);

        let start = Instant::now();
        let step = run_stage(&inv).await;
        assert!(step.outcome.is_failed());
        assert!(step.details.as_deref().unwrap().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation("/nonexistent/strataflow-binary", &[], dir.path());

        let step = run_stage(&inv).await;
        assert!(step.outcome.is_failed());
        assert!(step.exit_code.is_none());
    }
}
