//! Aggregate stage: standardized snapshot → business-ready marts.
//!
//! Marts are declared in the config manifest (source table, group-by
//! columns, aggregate ops) and computed uniformly; there are no
//! per-dataset code paths.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument, warn};

use strataflow_ingest::sha256_file;
use strataflow_report::render::render_transform_report;
use strataflow_report::{
    EnvBlock, RunBlock, TableOutcome, TableStatus, TransformMetadata, TransformSummary,
    write_metadata,
};
use strataflow_shared::fsio::{atomic_write_text, ensure_dir};
use strataflow_shared::{
    AggregateOp, AppConfig, Layer, MartSpec, Result, RunId, StrataflowError,
};

use crate::TransformReport;
use crate::table::{Table, read_table, write_table};

/// Run the aggregate stage over one standardized snapshot.
#[instrument(skip_all)]
pub async fn run_aggregate(
    config: &AppConfig,
    input_run_id: Option<RunId>,
    fixed_run_id: Option<RunId>,
) -> Result<TransformReport> {
    let started = Utc::now();
    let timer = Instant::now();

    let input_id =
        crate::resolve_input_run(&config.layer_root(Layer::Standardized), input_run_id)?;
    let input_data = config
        .layer_root(Layer::Standardized)
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
    let run_dir = config.layer_root(Layer::Marts).join(run_id.as_str());
    let data_dir = run_dir.join("data");
    let report_dir = run_dir.join("reports");
    ensure_dir(&data_dir)?;
    ensure_dir(&report_dir)?;

    info!(run_id = %run_id, input = %input_id, marts = config.marts.len(), "starting aggregate run");

    let mut tables = BTreeMap::new();
    for spec in &config.marts {
        let outcome = build_mart(spec, &input_data, &data_dir);
        if let TableStatus::Failed { message, .. } = &outcome.status {
            warn!(mart = %outcome.table, error = %message, "mart build failed");
        }
        tables.insert(outcome.table.clone(), outcome);
    }

    let failed = tables.values().filter(|t| t.status.is_failed()).count() as u64;
    let total = tables.len() as u64;
    let metadata = TransformMetadata {
        run: RunBlock {
            run_id: run_id.clone(),
            layer: Layer::Marts,
            pipeline: "aggregate".into(),
            started_utc: started,
            ended_utc: Utc::now(),
            duration_s: timer.elapsed().as_secs_f64(),
            input_run_id: Some(input_id),
        },
        env: EnvBlock::capture(),
        tables,
        summary: TransformSummary {
            tables_total: total,
            tables_succeeded: total - failed,
            tables_failed: failed,
        },
    };

    write_metadata(&data_dir, &metadata)?;
    atomic_write_text(
        &report_dir.join("aggregate_report.md"),
        &render_transform_report(&metadata),
    )?;

    info!(
        run_id = %run_id,
        marts = metadata.summary.tables_total,
        failed = metadata.summary.tables_failed,
        "aggregate run complete"
    );

    Ok(TransformReport {
        run_id,
        run_dir,
        metadata,
    })
}

/// Build one mart; any error is captured as a failed outcome.
fn build_mart(spec: &MartSpec, input_data: &Path, data_dir: &Path) -> TableOutcome {
    let timer = Instant::now();

    let result = (|| -> Result<(u64, Table, String)> {
        let source_path = input_data.join(format!("{}.csv", spec.source));
        if !source_path.is_file() {
            return Err(StrataflowError::precondition(format!(
                "mart '{}': source table not found: {}",
                spec.name,
                source_path.display()
            )));
        }
        let source = read_table(&source_path)?;
        let mart = aggregate_table(spec, &source)?;

        let output_path = data_dir.join(format!("{}.csv", spec.name));
        write_table(&output_path, &mart)?;
        let output_hash = sha256_file(&output_path)?;
        Ok((source.rows.len() as u64, mart, output_hash))
    })();

    match result {
        Ok((rows_in, mart, output_hash)) => {
            let mut counters = BTreeMap::new();
            counters.insert(format!("{}_groups", spec.name), mart.rows.len() as u64);
            TableOutcome {
                table: spec.name.clone(),
                status: TableStatus::Succeeded,
                rows_in: Some(rows_in),
                rows_out: Some(mart.rows.len() as u64),
                columns: mart.columns,
                output_sha256: Some(output_hash),
                duration_s: timer.elapsed().as_secs_f64(),
                counters,
            }
        }
        Err(err) => TableOutcome {
            table: spec.name.clone(),
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
// Grouping & aggregation
// ---------------------------------------------------------------------------

/// Group `source` by the spec's key columns and compute its aggregates.
fn aggregate_table(spec: &MartSpec, source: &Table) -> Result<Table> {
    let key_indices: Vec<usize> = spec
        .group_by
        .iter()
        .map(|col| {
            source.column_index(col).ok_or_else(|| {
                StrataflowError::validation(format!(
                    "mart '{}': group-by column '{col}' not in table '{}'",
                    spec.name, source.name
                ))
            })
        })
        .collect::<Result<_>>()?;

    let agg_indices: Vec<Option<usize>> = spec
        .aggregates
        .iter()
        .map(|agg| match &agg.column {
            None => Ok(None),
            Some(col) => source
                .column_index(col)
                .map(Some)
                .ok_or_else(|| {
                    StrataflowError::validation(format!(
                        "mart '{}': aggregate column '{col}' not in table '{}'",
                        spec.name, source.name
                    ))
                }),
        })
        .collect::<Result<_>>()?;

    // BTreeMap keeps group rows deterministically ordered by key.
    let mut groups: BTreeMap<Vec<String>, Vec<&Vec<String>>> = BTreeMap::new();
    for row in &source.rows {
        let key: Vec<String> = key_indices.iter().map(|&i| row[i].clone()).collect();
        groups.entry(key).or_default().push(row);
    }

    let mut columns = spec.group_by.clone();
    columns.extend(spec.aggregates.iter().map(|a| a.output_name()));

    let mut rows = Vec::with_capacity(groups.len());
    for (key, members) in &groups {
        let mut row = key.clone();
        for (agg, idx) in spec.aggregates.iter().zip(&agg_indices) {
            row.push(apply_aggregate(agg.op, *idx, members));
        }
        rows.push(row);
    }

    Ok(Table {
        name: spec.name.clone(),
        columns,
        rows,
    })
}

/// Compute one aggregate over the rows of a group.
///
/// Null (empty) cells are excluded. `sum`/`avg` consider only values that
/// parse as numbers; `min`/`max` compare numerically when every value
/// parses, lexicographically otherwise.
fn apply_aggregate(op: AggregateOp, column: Option<usize>, rows: &[&Vec<String>]) -> String {
    let values: Vec<&str> = match column {
        Some(i) => rows
            .iter()
            .map(|r| r[i].as_str())
            .filter(|v| !v.is_empty())
            .collect(),
        None => Vec::new(),
    };

    match op {
        AggregateOp::Count => rows.len().to_string(),
        AggregateOp::Sum | AggregateOp::Avg => {
            let numbers: Vec<f64> = values
                .iter()
                .filter_map(|v| v.parse::<f64>().ok())
                .collect();
            if numbers.is_empty() {
                return String::new();
            }
            let sum: f64 = numbers.iter().sum();
            match op {
                AggregateOp::Sum => format_number(sum),
                _ => format_number(sum / numbers.len() as f64),
            }
        }
        AggregateOp::Min | AggregateOp::Max => {
            if values.is_empty() {
                return String::new();
            }
            let numbers: Vec<f64> = values
                .iter()
                .filter_map(|v| v.parse::<f64>().ok())
                .collect();
            if numbers.len() == values.len() {
                let picked = numbers
                    .into_iter()
                    .reduce(|a, b| match op {
                        AggregateOp::Min => a.min(b),
                        _ => a.max(b),
                    })
                    .unwrap_or_default();
                format_number(picked)
            } else {
                let picked = match op {
                    AggregateOp::Min => values.iter().min(),
                    _ => values.iter().max(),
                };
                picked.map(|v| v.to_string()).unwrap_or_default()
            }
        }
    }
}

/// Integral results print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
