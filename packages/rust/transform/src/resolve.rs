//! Upstream run resolution for transform stages.

use std::path::Path;

use strataflow_shared::{Result, RunId, StrataflowError};

/// Resolve the input run of a stage: an explicit upstream run id, or the
/// latest run present under `layer_root`.
///
/// No runs at all is a precondition failure: the stage has nothing to
/// consume and must not invent an empty snapshot.
pub fn resolve_input_run(layer_root: &Path, explicit: Option<RunId>) -> Result<RunId> {
    if let Some(id) = explicit {
        let run_dir = layer_root.join(id.as_str());
        if !run_dir.is_dir() {
            return Err(StrataflowError::precondition(format!(
                "input run not found: {}",
                run_dir.display()
            )));
        }
        return Ok(id);
    }

    RunId::resolve_latest(layer_root)?.ok_or_else(|| {
        StrataflowError::precondition(format!(
            "no runs found under {}",
            layer_root.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_run_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let id: RunId = "20240101_000000_#deadbeef".parse().unwrap();

        let err = resolve_input_run(dir.path(), Some(id.clone())).unwrap_err();
        assert_eq!(err.error_type(), "precondition_failure");

        std::fs::create_dir(dir.path().join(id.as_str())).unwrap();
        assert_eq!(resolve_input_run(dir.path(), Some(id.clone())).unwrap(), id);
    }

    #[test]
    fn latest_run_resolved_when_unspecified() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20240101_000000_#aaaaaaaa", "20240201_000000_#bbbbbbbb"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let id = resolve_input_run(dir.path(), None).unwrap();
        assert_eq!(id.as_str(), "20240201_000000_#bbbbbbbb");
    }

    #[test]
    fn empty_layer_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input_run(dir.path(), None).unwrap_err();
        assert_eq!(err.error_type(), "precondition_failure");
    }
}
