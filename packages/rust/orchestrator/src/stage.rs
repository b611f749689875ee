//! The pipeline's fixed stage sequence and its skip/fail transition rules.

use chrono::Utc;

use strataflow_shared::{SkipReason, StageOutcome, StepResult};

/// One stage of the fixed linear pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Standardize,
    Aggregate,
}

/// Execution order. Downstream stages consume the previous stage's layer.
pub const STAGES: [Stage; 3] = [Stage::Ingest, Stage::Standardize, Stage::Aggregate];

impl Stage {
    /// Stage name; also the CLI subcommand the orchestrator invokes.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Standardize => "standardize",
            Stage::Aggregate => "aggregate",
        }
    }

    /// Transform stages are the ones short-circuited by `no_new_data`.
    pub fn is_transform(&self) -> bool {
        !matches!(self, Stage::Ingest)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Skip decision for a stage about to run: a total function over the
/// prior outcomes, not scattered conditionals.
///
/// An upstream failure dominates: once any stage has failed, everything
/// downstream is `upstream_failed` even when there was also no new data.
pub fn decide_skip(
    stage: Stage,
    upstream_failed: bool,
    no_new_data: bool,
) -> Option<SkipReason> {
    if upstream_failed {
        return Some(SkipReason::UpstreamFailed);
    }
    if stage.is_transform() && no_new_data {
        return Some(SkipReason::NoNewData);
    }
    None
}

/// Finalized step for a stage that was never invoked.
pub fn skipped_step(stage: Stage, reason: SkipReason) -> StepResult {
    let now = Utc::now();
    StepResult {
        name: stage.name().into(),
        outcome: StageOutcome::Skipped { reason },
        started_utc: now,
        ended_utc: now,
        duration_s: 0.0,
        exit_code: None,
        details: Some(match reason {
            SkipReason::NoNewData => "skipped: no new data".into(),
            SkipReason::UpstreamFailed => "skipped: upstream stage failed".into(),
        }),
        log_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_sequence_is_fixed() {
        assert_eq!(STAGES.len(), 3);
        assert_eq!(STAGES[0].name(), "ingest");
        assert_eq!(STAGES[2].name(), "aggregate");
        assert!(!STAGES[0].is_transform());
        assert!(STAGES[1].is_transform());
    }

    #[test]
    fn upstream_failure_dominates() {
        assert_eq!(
            decide_skip(Stage::Standardize, true, true),
            Some(SkipReason::UpstreamFailed)
        );
        assert_eq!(
            decide_skip(Stage::Aggregate, true, false),
            Some(SkipReason::UpstreamFailed)
        );
    }

    #[test]
    fn no_new_data_skips_transforms_only() {
        assert_eq!(
            decide_skip(Stage::Standardize, false, true),
            Some(SkipReason::NoNewData)
        );
        assert_eq!(decide_skip(Stage::Ingest, false, true), None);
        assert_eq!(decide_skip(Stage::Aggregate, false, false), None);
    }

    #[test]
    fn skipped_step_is_terminal_and_zero_duration() {
        let step = skipped_step(Stage::Aggregate, SkipReason::NoNewData);
        assert!(step.outcome.is_skipped());
        assert_eq!(step.duration_s, 0.0);
        assert!(step.exit_code.is_none());
    }
}
