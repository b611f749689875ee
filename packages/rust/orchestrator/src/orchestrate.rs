//! End-to-end pipeline orchestration.
//!
//! Drives the fixed ingest → standardize → aggregate sequence. Each stage
//! runs as an isolated subprocess; the orchestrator learns ingest results
//! by reading the latest raw run's metadata document (process boundary, no
//! shared memory) and decides skip/run/fail for every downstream stage.
//! The summary is always written, also when a stage fails mid-pipeline.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use strataflow_report::{read_ingest_metadata, write_summary};
use strataflow_shared::fsio::ensure_dir;
use strataflow_shared::{
    AppConfig, Layer, PipelineSummary, Result, RunId, StageOutcome, StepResult,
};

use crate::runner::{StageInvocation, run_stage};
use crate::stage::{STAGES, Stage, decide_skip, skipped_step};

/// Options for one orchestrator invocation.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Binary invoked for each stage (normally `std::env::current_exe()`).
    pub program: PathBuf,
    /// Config file forwarded to stage subprocesses via `--config`.
    pub config_path: Option<PathBuf>,
    /// Fixed orchestration run id; allocated when absent.
    pub run_id: Option<RunId>,
}

/// Progress callback for reporting pipeline status.
pub trait PipelineProgress: Send + Sync {
    /// Called when a stage is about to be invoked.
    fn stage_started(&self, stage: Stage);
    /// Called when a stage reaches a terminal state (also for skips).
    fn stage_finished(&self, step: &StepResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl PipelineProgress for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _step: &StepResult) {}
}

/// Run the full pipeline and write its summary.
///
/// The returned summary reflects exactly what happened; the caller maps
/// `success` onto the process exit code.
#[instrument(skip_all)]
pub async fn run_pipeline(
    config: &AppConfig,
    opts: &PipelineOptions,
    progress: &dyn PipelineProgress,
) -> Result<PipelineSummary> {
    let started = Utc::now();
    let timer = Instant::now();

    let run_id = match &opts.run_id {
        Some(id) => id.clone(),
        None => RunId::allocate(started),
    };
    let log_dir = config
        .paths
        .artifact_root
        .join("orchestrator")
        .join(run_id.as_str())
        .join("logs");
    ensure_dir(&log_dir)?;

    info!(run_id = %run_id, "starting pipeline run");

    let timeout = Duration::from_secs(config.orchestrator.stage_timeout_secs);
    let mut steps: Vec<StepResult> = Vec::with_capacity(STAGES.len());
    let mut upstream_failed = false;
    let mut no_new_data = false;
    let mut raw_run_id: Option<RunId> = None;
    let mut standardized_run_id: Option<RunId> = None;
    let mut marts_run_id: Option<RunId> = None;

    for stage in STAGES {
        if let Some(reason) = decide_skip(stage, upstream_failed, no_new_data) {
            info!(stage = %stage, reason = reason.as_str(), "stage skipped");
            let step = skipped_step(stage, reason);
            progress.stage_finished(&step);
            steps.push(step);
            continue;
        }

        progress.stage_started(stage);
        let invocation = StageInvocation {
            stage,
            program: opts.program.clone(),
            args: stage_args(stage, opts, &run_id, &raw_run_id, &standardized_run_id),
            log_path: log_dir.join(format!("{}.log", stage.name())),
            timeout,
        };
        let mut step = run_stage(&invocation).await;

        if step.outcome.is_succeeded() {
            match stage {
                Stage::Ingest => {
                    match latest_ingest_result(config) {
                        Ok((id, fresh)) => {
                            raw_run_id = Some(id);
                            no_new_data = fresh;
                        }
                        Err(err) => {
                            // The subprocess claimed success but left no
                            // readable run behind; the step cannot be
                            // trusted as succeeded.
                            warn!(error = %err, "ingest result unreadable");
                            step.outcome = StageOutcome::Failed;
                            step.details = Some(format!("ingest result unreadable: {err}"));
                        }
                    }
                }
                Stage::Standardize => {
                    standardized_run_id =
                        RunId::resolve_latest(&config.layer_root(Layer::Standardized))?;
                }
                Stage::Aggregate => {
                    marts_run_id = RunId::resolve_latest(&config.layer_root(Layer::Marts))?;
                }
            }
        }

        if step.outcome.is_failed() {
            upstream_failed = true;
        }
        progress.stage_finished(&step);
        steps.push(step);
    }

    let ended = Utc::now();
    let summary = PipelineSummary {
        run_id: run_id.clone(),
        started_utc: started,
        ended_utc: ended,
        duration_s: timer.elapsed().as_secs_f64(),
        success: PipelineSummary::overall_success(&steps),
        steps,
        raw_run_id,
        standardized_run_id,
        marts_run_id,
        no_new_data,
    };

    write_summary(&config.paths.artifact_root, &summary)?;

    info!(
        run_id = %run_id,
        success = summary.success,
        no_new_data = summary.no_new_data,
        "pipeline run complete"
    );
    Ok(summary)
}

/// Argument list for a stage subcommand.
fn stage_args(
    stage: Stage,
    opts: &PipelineOptions,
    run_id: &RunId,
    raw_run_id: &Option<RunId>,
    standardized_run_id: &Option<RunId>,
) -> Vec<String> {
    let mut args = vec![stage.name().to_string()];
    if let Some(path) = &opts.config_path {
        args.push("--config".into());
        args.push(path.display().to_string());
    }
    match stage {
        // The raw snapshot reuses the orchestration run id so logs and
        // artifacts correlate by name.
        Stage::Ingest => {
            args.push("--run-id".into());
            args.push(run_id.as_str().to_string());
        }
        Stage::Standardize => {
            if let Some(id) = raw_run_id {
                args.push("--input-run-id".into());
                args.push(id.as_str().to_string());
            }
        }
        Stage::Aggregate => {
            if let Some(id) = standardized_run_id {
                args.push("--input-run-id".into());
                args.push(id.as_str().to_string());
            }
        }
    }
    args
}

/// Latest raw run id plus its `no_new_data` flag, read from metadata.
fn latest_ingest_result(config: &AppConfig) -> Result<(RunId, bool)> {
    let raw_root = config.layer_root(Layer::Raw);
    let run_id = RunId::resolve_latest(&raw_root)?.ok_or_else(|| {
        strataflow_shared::StrataflowError::validation(format!(
            "no ingest run found under {}",
            raw_root.display()
        ))
    })?;
    let metadata = read_ingest_metadata(&raw_root.join(run_id.as_str()))?;
    Ok((run_id, metadata.summary.no_new_data))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;

    use strataflow_report::{EnvBlock, IngestMetadata, IngestSummary, RunBlock, write_metadata};
    use strataflow_shared::{PathsConfig, SkipReason};

    fn test_config(root: &Path) -> AppConfig {
        AppConfig {
            paths: PathsConfig {
                source_root: root.join("sources"),
                artifact_root: root.join("artifacts"),
            },
            ..Default::default()
        }
    }

    /// Seed a raw run whose metadata reports the given `no_new_data`.
    fn seed_raw_run(config: &AppConfig, run_id: &str, no_new_data: bool) {
        let data_dir = config
            .layer_root(Layer::Raw)
            .join(run_id)
            .join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let id: RunId = run_id.parse().unwrap();
        let metadata = IngestMetadata {
            run: RunBlock {
                run_id: id,
                layer: Layer::Raw,
                pipeline: "ingest".into(),
                started_utc: Utc::now(),
                ended_utc: Utc::now(),
                duration_s: 0.1,
                input_run_id: None,
            },
            env: EnvBlock::capture(),
            tables: BTreeMap::new(),
            summary: IngestSummary {
                files_total: 2,
                files_copied: if no_new_data { 0 } else { 2 },
                files_unchanged: if no_new_data { 2 } else { 0 },
                files_failed: 0,
                no_new_data,
            },
        };
        write_metadata(&data_dir, &metadata).unwrap();
    }

    fn options(program: &str) -> PipelineOptions {
        PipelineOptions {
            program: program.into(),
            config_path: None,
            run_id: None,
        }
    }

    fn outcome_labels(summary: &PipelineSummary) -> Vec<(&str, &'static str)> {
        summary
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.outcome.label()))
            .collect()
    }

    #[tokio::test]
    async fn all_stages_run_when_there_is_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        seed_raw_run(&config, "20240101_000000_#deadbeef", false);

        // `true` exits 0 regardless of arguments, standing in for stages.
        let summary = run_pipeline(&config, &options("true"), &SilentProgress)
            .await
            .unwrap();

        assert!(summary.success);
        assert!(!summary.no_new_data);
        assert_eq!(
            outcome_labels(&summary),
            vec![
                ("ingest", "succeeded"),
                ("standardize", "succeeded"),
                ("aggregate", "succeeded"),
            ]
        );
        assert_eq!(
            summary.raw_run_id.as_ref().unwrap().as_str(),
            "20240101_000000_#deadbeef"
        );

        // One log artifact per invoked stage.
        let log_dir = config
            .paths
            .artifact_root
            .join("orchestrator")
            .join(summary.run_id.as_str())
            .join("logs");
        for stage in ["ingest", "standardize", "aggregate"] {
            assert!(log_dir.join(format!("{stage}.log")).exists());
        }
    }

    #[tokio::test]
    async fn no_new_data_skips_downstream_but_run_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        seed_raw_run(&config, "20240101_000000_#deadbeef", true);

        let summary = run_pipeline(&config, &options("true"), &SilentProgress)
            .await
            .unwrap();

        assert!(summary.success);
        assert!(summary.no_new_data);
        assert_eq!(
            outcome_labels(&summary),
            vec![
                ("ingest", "succeeded"),
                ("standardize", "skipped"),
                ("aggregate", "skipped"),
            ]
        );
        for step in &summary.steps[1..] {
            assert_eq!(
                step.outcome,
                StageOutcome::Skipped {
                    reason: SkipReason::NoNewData
                }
            );
        }
    }

    #[tokio::test]
    async fn failed_ingest_skips_downstream_and_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        // `false` exits 1: the ingest stage fails like a missing source dir.
        let summary = run_pipeline(&config, &options("false"), &SilentProgress)
            .await
            .unwrap();

        assert!(!summary.success);
        assert_eq!(
            outcome_labels(&summary),
            vec![
                ("ingest", "failed"),
                ("standardize", "skipped"),
                ("aggregate", "skipped"),
            ]
        );
        for step in &summary.steps[1..] {
            assert_eq!(
                step.outcome,
                StageOutcome::Skipped {
                    reason: SkipReason::UpstreamFailed
                }
            );
        }

        // The summary is still written, naming the failing stage.
        let summary_path = config
            .paths
            .artifact_root
            .join("reports")
            .join(summary.run_id.as_str())
            .join("summary_report.json");
        let persisted: PipelineSummary =
            serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert!(!persisted.success);
        assert_eq!(persisted.steps[0].name, "ingest");
        assert!(persisted.steps[0].outcome.is_failed());
    }

    #[tokio::test]
    async fn successful_exit_without_ingest_run_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // No raw run seeded: `true` exits 0 but leaves nothing behind.

        let summary = run_pipeline(&config, &options("true"), &SilentProgress)
            .await
            .unwrap();

        assert!(!summary.success);
        assert!(summary.steps[0].outcome.is_failed());
        assert!(
            summary.steps[0]
                .details
                .as_deref()
                .unwrap()
                .contains("unreadable")
        );
    }
}
