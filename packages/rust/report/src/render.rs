//! Human-readable markdown rendering of run reports.
//!
//! Reports are plain string assembly; the structured truth lives in
//! `metadata.json`; these renderings exist for people.

use strataflow_shared::{FileStatus, PipelineSummary};

use crate::metadata::{IngestMetadata, TableStatus, TransformMetadata};

/// Render the per-run ingest report.
pub fn render_ingest_report(meta: &IngestMetadata) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Ingest Report — {}\n\n", meta.run.run_id));
    out.push_str(&format!("- Started (UTC): {}\n", meta.run.started_utc.to_rfc3339()));
    out.push_str(&format!("- Ended (UTC): {}\n", meta.run.ended_utc.to_rfc3339()));
    out.push_str(&format!("- Duration: {:.3}s\n", meta.run.duration_s));
    out.push_str(&format!(
        "- Files: {} total / {} copied / {} unchanged / {} failed\n",
        meta.summary.files_total,
        meta.summary.files_copied,
        meta.summary.files_unchanged,
        meta.summary.files_failed
    ));
    out.push_str(&format!("- No new data: {}\n\n", meta.summary.no_new_data));

    out.push_str("| file | dataset | status | rows | size (bytes) | sha256 | error |\n");
    out.push_str("|------|---------|--------|------|--------------|--------|-------|\n");
    for rec in meta.tables.values() {
        let (status, error) = match &rec.status {
            FileStatus::Copied => ("copied", String::new()),
            FileStatus::Unchanged => ("unchanged", String::new()),
            FileStatus::Failed {
                error_type,
                message,
            } => ("failed", format!("{error_type}: {message}")),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            rec.file,
            rec.dataset,
            status,
            rec.rows.map(|r| r.to_string()).unwrap_or_default(),
            rec.size_bytes.map(|s| s.to_string()).unwrap_or_default(),
            rec.sha256.as_deref().map(short_hash).unwrap_or_default(),
            error
        ));
    }
    out
}

/// Render the per-run report of a transform stage.
pub fn render_transform_report(meta: &TransformMetadata) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# {} Report — {}\n\n",
        capitalize(&meta.run.pipeline),
        meta.run.run_id
    ));
    if let Some(input) = &meta.run.input_run_id {
        out.push_str(&format!("- Input run: {input}\n"));
    }
    out.push_str(&format!("- Duration: {:.3}s\n", meta.run.duration_s));
    out.push_str(&format!(
        "- Tables: {} total / {} succeeded / {} failed\n\n",
        meta.summary.tables_total,
        meta.summary.tables_succeeded,
        meta.summary.tables_failed
    ));

    out.push_str("| table | status | rows in | rows out | output sha256 | error |\n");
    out.push_str("|-------|--------|---------|----------|---------------|-------|\n");
    for rec in meta.tables.values() {
        let (status, error) = match &rec.status {
            TableStatus::Succeeded => ("succeeded", String::new()),
            TableStatus::Failed {
                error_type,
                message,
            } => ("failed", format!("{error_type}: {message}")),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            rec.table,
            status,
            rec.rows_in.map(|r| r.to_string()).unwrap_or_default(),
            rec.rows_out.map(|r| r.to_string()).unwrap_or_default(),
            rec.output_sha256.as_deref().map(short_hash).unwrap_or_default(),
            error
        ));
    }

    let counters: Vec<String> = meta
        .tables
        .values()
        .flat_map(|t| t.counters.iter())
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if !counters.is_empty() {
        out.push_str(&format!("\nCounters: {}\n", counters.join(", ")));
    }
    out
}

/// Render the orchestrator's pipeline summary.
pub fn render_summary(summary: &PipelineSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Pipeline Summary — {}\n\n", summary.run_id));
    out.push_str(&format!(
        "- Outcome: **{}**\n",
        if summary.success { "success" } else { "failure" }
    ));
    out.push_str(&format!("- Started (UTC): {}\n", summary.started_utc.to_rfc3339()));
    out.push_str(&format!("- Ended (UTC): {}\n", summary.ended_utc.to_rfc3339()));
    out.push_str(&format!("- Duration: {:.3}s\n", summary.duration_s));
    out.push_str(&format!("- No new data: {}\n\n", summary.no_new_data));

    out.push_str("| step | status | reason | duration (s) | exit code | log |\n");
    out.push_str("|------|--------|--------|--------------|-----------|-----|\n");
    for step in &summary.steps {
        let reason = match step.outcome {
            strataflow_shared::StageOutcome::Skipped { reason } => reason.as_str(),
            _ => "",
        };
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} | {} | {} |\n",
            step.name,
            step.outcome.label(),
            reason,
            step.duration_s,
            step.exit_code.map(|c| c.to_string()).unwrap_or_default(),
            step.log_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        ));
    }

    out.push_str("\n## Lineage\n\n");
    for (layer, id) in [
        ("raw", &summary.raw_run_id),
        ("standardized", &summary.standardized_run_id),
        ("marts", &summary.marts_run_id),
    ] {
        if let Some(id) = id {
            out.push_str(&format!("- {layer}: {id}\n"));
        }
    }
    out
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(12).collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
