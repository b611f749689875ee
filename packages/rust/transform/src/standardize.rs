//! Standardize stage: raw snapshot → cleaned, standardized snapshot.
//!
//! Mechanical, non-business cleaning at 1:1 row grain: whitespace trim,
//! empty-string → null, date columns normalized to `YYYY-MM-DD`, numeric
//! columns stripped of spaces and thousands separators. Column kinds are
//! inferred by sampling: a column is a date/numeric column only when every
//! non-null value parses as one.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument, warn};

use strataflow_ingest::sha256_file;
use strataflow_report::render::render_transform_report;
use strataflow_report::{
    EnvBlock, RunBlock, TableOutcome, TableStatus, TransformMetadata, TransformSummary,
    write_metadata,
};
use strataflow_shared::fsio::{atomic_write_text, ensure_dir};
use strataflow_shared::{AppConfig, Layer, Result, RunId, StrataflowError};

use crate::TransformReport;
use crate::table::{Table, list_tables, read_table, write_table};

/// Run the standardize stage over one raw snapshot.
#[instrument(skip_all)]
pub async fn run_standardize(
    config: &AppConfig,
    input_run_id: Option<RunId>,
    fixed_run_id: Option<RunId>,
) -> Result<TransformReport> {
    let started = Utc::now();
    let timer = Instant::now();

    let input_id = crate::resolve_input_run(&config.layer_root(Layer::Raw), input_run_id)?;
    let input_data = config
        .layer_root(Layer::Raw)
        .join(input_id.as_str())
        .join("data");
    if !input_data.is_dir() {
        return Err(StrataflowError::precondition(format!(
            "input run has no data directory: {}",
            input_data.display()
        )));
    }

    let run_id = match fixed_run_id {
        Some(id) => id,
        None => RunId::derive(started, &input_id),
    };
    let run_dir = config.layer_root(Layer::Standardized).join(run_id.as_str());
    let data_dir = run_dir.join("data");
    let report_dir = run_dir.join("reports");
    ensure_dir(&data_dir)?;
    ensure_dir(&report_dir)?;

    info!(run_id = %run_id, input = %input_id, "starting standardize run");

    let mut tables = BTreeMap::new();
    for path in list_tables(&input_data)? {
        let outcome = standardize_table(&path, &data_dir);
        if let TableStatus::Failed { message, .. } = &outcome.status {
            warn!(table = %outcome.table, error = %message, "table standardization failed");
        }
        tables.insert(outcome.table.clone(), outcome);
    }

    let summary = summarize(&tables);
    let metadata = TransformMetadata {
        run: RunBlock {
            run_id: run_id.clone(),
            layer: Layer::Standardized,
            pipeline: "standardize".into(),
            started_utc: started,
            ended_utc: Utc::now(),
            duration_s: timer.elapsed().as_secs_f64(),
            input_run_id: Some(input_id),
        },
        env: EnvBlock::capture(),
        tables,
        summary,
    };

    write_metadata(&data_dir, &metadata)?;
    atomic_write_text(
        &report_dir.join("standardize_report.md"),
        &render_transform_report(&metadata),
    )?;

    info!(
        run_id = %run_id,
        tables = metadata.summary.tables_total,
        failed = metadata.summary.tables_failed,
        "standardize run complete"
    );

    Ok(TransformReport {
        run_id,
        run_dir,
        metadata,
    })
}

/// Standardize one table; any error is captured as a failed outcome.
fn standardize_table(input_path: &Path, data_dir: &Path) -> TableOutcome {
    let timer = Instant::now();
    let name = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let result = (|| -> Result<(Table, BTreeMap<String, u64>, String)> {
        let table = read_table(input_path)?;
        let (standardized, counters) = standardize_rows(table);

        let file_name = format!("{}.csv", standardized.name);
        let output_path = data_dir.join(&file_name);
        write_table(&output_path, &standardized)?;
        let output_hash = sha256_file(&output_path)?;
        Ok((standardized, counters, output_hash))
    })();

    match result {
        Ok((table, counters, output_hash)) => TableOutcome {
            table: table.name.clone(),
            status: TableStatus::Succeeded,
            rows_in: Some(table.rows.len() as u64),
            rows_out: Some(table.rows.len() as u64),
            columns: table.columns,
            output_sha256: Some(output_hash),
            duration_s: timer.elapsed().as_secs_f64(),
            counters,
        },
        Err(err) => TableOutcome {
            table: name,
            status: TableStatus::Failed {
                error_type: err.error_type().into(),
                message: err.to_string(),
            },
            rows_in: None,
            rows_out: None,
            columns: vec![],
            output_sha256: None,
            duration_s: timer.elapsed().as_secs_f64(),
            counters: BTreeMap::new(),
        },
    }
}

// ---------------------------------------------------------------------------
// Cell-level standardization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Date,
    Numeric,
}

/// Apply trimming, nulling, and per-column normalization. Returns the new
/// table plus counters for the audit record.
fn standardize_rows(mut table: Table) -> (Table, BTreeMap<String, u64>) {
    let mut trimmed = 0u64;
    let mut nulled = 0u64;

    for row in &mut table.rows {
        for cell in row.iter_mut() {
            let clean = cell.trim();
            if clean.len() != cell.len() {
                trimmed += 1;
            }
            if clean.is_empty() && !cell.is_empty() {
                nulled += 1;
            }
            if clean.len() != cell.len() {
                *cell = clean.to_string();
            }
        }
    }

    let kinds: Vec<ColumnKind> = (0..table.columns.len())
        .map(|i| classify_column(table.rows.iter().map(|r| r[i].as_str())))
        .collect();

    let mut dates = 0u64;
    let mut numbers = 0u64;
    for row in &mut table.rows {
        for (i, cell) in row.iter_mut().enumerate() {
            if cell.is_empty() {
                continue;
            }
            match kinds[i] {
                ColumnKind::Date => {
                    if let Some(date) = try_parse_date(cell) {
                        let formatted = date.format("%Y-%m-%d").to_string();
                        if *cell != formatted {
                            dates += 1;
                            *cell = formatted;
                        }
                    }
                }
                ColumnKind::Numeric => {
                    if let Some(clean) = normalize_numeric(cell) {
                        if *cell != clean {
                            numbers += 1;
                            *cell = clean;
                        }
                    }
                }
                ColumnKind::Text => {}
            }
        }
    }

    let mut counters = BTreeMap::new();
    counters.insert("cells_trimmed".to_string(), trimmed);
    counters.insert("cells_nulled".to_string(), nulled);
    counters.insert("dates_normalized".to_string(), dates);
    counters.insert("numbers_normalized".to_string(), numbers);
    (table, counters)
}

/// A column is a date/numeric column when every non-null value parses.
fn classify_column<'a>(values: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut seen = 0usize;
    let mut all_dates = true;
    let mut all_numeric = true;

    for value in values.filter(|v| !v.is_empty()) {
        seen += 1;
        if all_dates && try_parse_date(value).is_none() {
            all_dates = false;
        }
        if all_numeric && normalize_numeric(value).is_none() {
            all_numeric = false;
        }
        if !all_dates && !all_numeric {
            return ColumnKind::Text;
        }
    }

    if seen == 0 {
        ColumnKind::Text
    } else if all_dates {
        ColumnKind::Date
    } else {
        ColumnKind::Numeric
    }
}

/// Accepted input date shapes, normalized to ISO `YYYY-MM-DD`.
fn try_parse_date(value: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"];
    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    // Datetime values keep only their date part.
    if let Some(prefix) = value.get(..10) {
        if value.len() > 10 {
            if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }
    None
}

/// Strip spaces and thousands separators; `None` when not numeric.
fn normalize_numeric(value: &str) -> Option<String> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    compact.parse::<f64>().ok()?;
    Some(compact)
}

fn summarize(tables: &BTreeMap<String, TableOutcome>) -> TransformSummary {
    let failed = tables.values().filter(|t| t.status.is_failed()).count() as u64;
    let total = tables.len() as u64;
    TransformSummary {
        tables_total: total,
        tables_succeeded: total - failed,
        tables_failed: failed,
    }
}
