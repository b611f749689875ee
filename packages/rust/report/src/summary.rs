//! Pipeline summary writer.

use std::path::{Path, PathBuf};

use strataflow_shared::fsio::{atomic_write_json, atomic_write_text, ensure_dir};
use strataflow_shared::{PipelineSummary, Result};

use crate::render::render_summary;

/// File name of the structured summary document.
pub const SUMMARY_JSON: &str = "summary_report.json";
/// File name of the human-readable summary.
pub const SUMMARY_MD: &str = "summary_report.md";

/// Write the pipeline summary under `<artifact_root>/reports/<run-id>/`.
///
/// Single shot at the end of orchestration: the writer only ever sees
/// finalized step results, so a partial orchestrator crash can never leave
/// a summary claiming success for stages that did not complete.
pub fn write_summary(artifact_root: &Path, summary: &PipelineSummary) -> Result<PathBuf> {
    let dir = artifact_root
        .join("reports")
        .join(summary.run_id.as_str());
    ensure_dir(&dir)?;

    atomic_write_json(&dir.join(SUMMARY_JSON), summary)?;
    atomic_write_text(&dir.join(SUMMARY_MD), &render_summary(summary))?;

    tracing::info!(
        run_id = %summary.run_id,
        success = summary.success,
        path = %dir.display(),
        "pipeline summary written"
    );
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strataflow_shared::{StageOutcome, StepResult};

    #[test]
    fn summary_written_as_json_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let summary = PipelineSummary {
            run_id: "20240101_000000_#deadbeef".parse().unwrap(),
            started_utc: Utc::now(),
            ended_utc: Utc::now(),
            duration_s: 1.0,
            steps: vec![StepResult {
                name: "ingest".into(),
                outcome: StageOutcome::Succeeded,
                started_utc: Utc::now(),
                ended_utc: Utc::now(),
                duration_s: 1.0,
                exit_code: Some(0),
                details: None,
                log_path: None,
            }],
            raw_run_id: None,
            standardized_run_id: None,
            marts_run_id: None,
            no_new_data: false,
            success: true,
        };

        let out = write_summary(dir.path(), &summary).unwrap();
        assert!(out.join(SUMMARY_JSON).exists());
        assert!(out.join(SUMMARY_MD).exists());

        let back: PipelineSummary = serde_json::from_str(
            &std::fs::read_to_string(out.join(SUMMARY_JSON)).unwrap(),
        )
        .unwrap();
        assert!(back.success);
        assert_eq!(back.steps.len(), 1);
    }
}
