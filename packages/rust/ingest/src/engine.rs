//! Incremental ingestion engine.
//!
//! Ingests the declared datasets into a run-scoped raw snapshot. Per file:
//! fingerprint, compare against persisted state, copy, re-hash the copy,
//! and only then commit state. A single file's failure never aborts the
//! run; the stage itself fails only when a precondition is violated before
//! any file work begins.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use globset::{Glob, GlobMatcher};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use strataflow_report::render::render_ingest_report;
use strataflow_report::{EnvBlock, IngestMetadata, IngestSummary, RunBlock, write_metadata};
use strataflow_shared::fsio::{atomic_write_text, ensure_dir};
use strataflow_shared::{
    AppConfig, DatasetSpec, FileOutcome, FileStatus, Layer, Result, RunId, StrataflowError,
};

use crate::fingerprint::sha256_file;
use crate::state::{DatasetState, StateStore};

/// Result of one ingestion run.
#[derive(Debug)]
pub struct IngestReport {
    pub run_id: RunId,
    /// `<artifact_root>/raw/<run-id>`.
    pub run_dir: PathBuf,
    pub metadata: IngestMetadata,
}

impl IngestReport {
    /// True iff every discovered file classified as unchanged.
    pub fn no_new_data(&self) -> bool {
        self.metadata.summary.no_new_data
    }
}

/// One file matched by the dataset manifest, frozen at discovery time.
#[derive(Debug, Clone)]
struct DiscoveredFile {
    dataset: String,
    file_name: String,
    source_path: PathBuf,
    expected_schema: Vec<String>,
}

impl DiscoveredFile {
    /// State-store key: uniform `<dataset>/<file-name>`.
    fn state_key(&self) -> String {
        format!("{}/{}", self.dataset, self.file_name)
    }
}

/// Run the ingestion stage.
///
/// `fixed_run_id` pins the output run id (orchestrated runs pass one for
/// log correlation); otherwise a fresh id is allocated.
#[instrument(skip_all, fields(source_root = %config.paths.source_root.display()))]
pub async fn run_ingest(config: &AppConfig, fixed_run_id: Option<RunId>) -> Result<IngestReport> {
    let started = Utc::now();
    let timer = Instant::now();

    let source_root = &config.paths.source_root;
    if !source_root.is_dir() {
        return Err(StrataflowError::precondition(format!(
            "source root not found: {}",
            source_root.display()
        )));
    }

    let run_id = match fixed_run_id {
        Some(id) => id,
        None => RunId::allocate(started),
    };
    let run_dir = config.layer_root(Layer::Raw).join(run_id.as_str());
    let data_dir = run_dir.join("data");
    let report_dir = run_dir.join("reports");
    ensure_dir(&data_dir)?;
    ensure_dir(&report_dir)?;

    let discovered = discover_files(source_root, &config.datasets)?;
    info!(run_id = %run_id, files = discovered.len(), "starting ingest run");

    let store = Arc::new(StateStore::load_from(&config.ingest_state_path())?);
    let semaphore = Arc::new(Semaphore::new(config.ingest.workers.max(1)));

    let mut handles = Vec::with_capacity(discovered.len());
    for file in discovered {
        let store = store.clone();
        let sem = semaphore.clone();
        let data_dir = data_dir.clone();
        let run_id = run_id.clone();
        let fallback = (file.dataset.clone(), file.file_name.clone(), file.source_path.clone());

        let handle = tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore closed");
            tokio::task::spawn_blocking(move || process_file(&file, &data_dir, &store, &run_id))
                .await
        });
        handles.push((fallback, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for ((dataset, file_name, source_path), handle) in handles {
        match handle.await {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            // A panicked or cancelled worker is recorded like any other
            // per-file failure; remaining files are unaffected.
            Ok(Err(join_err)) | Err(join_err) => {
                warn!(file = %file_name, error = %join_err, "ingest worker died");
                outcomes.push(FileOutcome {
                    file: file_name.clone(),
                    dataset,
                    source_path,
                    status: FileStatus::Failed {
                        error_type: "worker".into(),
                        message: join_err.to_string(),
                    },
                    mtime_utc: None,
                    sha256: None,
                    size_bytes: None,
                    rows: None,
                    schema: vec![],
                    schema_warning: None,
                    read_duration_s: None,
                    copy_duration_s: None,
                });
            }
        }
    }

    let summary = summarize(&outcomes);
    let ended = Utc::now();

    let metadata = IngestMetadata {
        run: RunBlock {
            run_id: run_id.clone(),
            layer: Layer::Raw,
            pipeline: "ingest".into(),
            started_utc: started,
            ended_utc: ended,
            duration_s: timer.elapsed().as_secs_f64(),
            input_run_id: None,
        },
        env: EnvBlock::capture(),
        tables: outcomes
            .iter()
            .map(|o| (format!("{}/{}", o.dataset, o.file), o.clone()))
            .collect(),
        summary,
    };

    write_metadata(&data_dir, &metadata)?;
    atomic_write_text(
        &report_dir.join("ingest_report.md"),
        &render_ingest_report(&metadata),
    )?;

    info!(
        run_id = %run_id,
        copied = metadata.summary.files_copied,
        unchanged = metadata.summary.files_unchanged,
        failed = metadata.summary.files_failed,
        no_new_data = metadata.summary.no_new_data,
        "ingest run complete"
    );

    Ok(IngestReport {
        run_id,
        run_dir,
        metadata,
    })
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// List the files under `source_root` matched by each dataset's globs.
fn discover_files(source_root: &Path, datasets: &[DatasetSpec]) -> Result<Vec<DiscoveredFile>> {
    let mut names: Vec<String> = Vec::new();
    let entries =
        std::fs::read_dir(source_root).map_err(|e| StrataflowError::io(source_root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StrataflowError::io(source_root, e))?;
        if entry.path().is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    let mut found = Vec::new();
    for spec in datasets {
        let include = compile_glob(&spec.pattern, &spec.name)?;
        let exclude = spec
            .exclude
            .as_deref()
            .map(|p| compile_glob(p, &spec.name))
            .transpose()?;

        for name in &names {
            if !include.is_match(name) {
                continue;
            }
            if exclude.as_ref().is_some_and(|g| g.is_match(name)) {
                continue;
            }
            found.push(DiscoveredFile {
                dataset: spec.name.clone(),
                file_name: name.clone(),
                source_path: source_root.join(name),
                expected_schema: spec.expected_schema.clone(),
            });
        }
    }
    found.sort_by(|a, b| (&a.dataset, &a.file_name).cmp(&(&b.dataset, &b.file_name)));
    Ok(found)
}

fn compile_glob(pattern: &str, dataset: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| {
            StrataflowError::config(format!("dataset '{dataset}': bad glob {pattern:?}: {e}"))
        })
}

// ---------------------------------------------------------------------------
// Per-file processing
// ---------------------------------------------------------------------------

/// Process one discovered file: fingerprint, classify, copy, verify, commit.
///
/// Every error is converted into a `Failed` outcome at this boundary; the
/// caller never sees an `Err` from a single file.
fn process_file(
    file: &DiscoveredFile,
    data_dir: &Path,
    store: &StateStore,
    run_id: &RunId,
) -> FileOutcome {
    let key = file.state_key();

    let fp = match crate::fingerprint::fingerprint(&file.source_path) {
        Ok(fp) => fp,
        Err(err) => {
            warn!(file = %file.file_name, error = %err, "fingerprint failed");
            return failed_outcome(file, &err, None);
        }
    };

    // Hash is authoritative: identical content is unchanged even when the
    // modification time moved. State stays untouched.
    let prior = store.get(&key);
    if prior.as_ref().is_some_and(|p| p.sha256 == fp.sha256) {
        info!(file = %file.file_name, dataset = %file.dataset, "unchanged");
        return FileOutcome {
            file: file.file_name.clone(),
            dataset: file.dataset.clone(),
            source_path: file.source_path.clone(),
            status: FileStatus::Unchanged,
            mtime_utc: Some(fp.mtime_utc),
            sha256: Some(fp.sha256),
            size_bytes: Some(fp.size_bytes),
            rows: None,
            schema: vec![],
            schema_warning: None,
            read_duration_s: None,
            copy_duration_s: None,
        };
    }

    // New or changed: snapshot the table stats once, then copy and verify.
    let read_timer = Instant::now();
    let (rows, schema) = match read_table_stats(&file.source_path) {
        Ok(stats) => stats,
        Err(err) => {
            warn!(file = %file.file_name, error = %err, "table read failed");
            return failed_outcome(file, &err, Some(&fp));
        }
    };
    let read_duration = read_timer.elapsed().as_secs_f64();
    let schema_warning = check_schema(&file.expected_schema, &schema);

    let copy_timer = Instant::now();
    let dest = data_dir.join(&file.file_name);
    if let Err(err) =
        std::fs::copy(&file.source_path, &dest).map_err(|e| StrataflowError::io(&dest, e))
    {
        warn!(file = %file.file_name, error = %err, "copy failed");
        return failed_outcome(file, &err, Some(&fp));
    }

    let copied_hash = match sha256_file(&dest) {
        Ok(hash) => hash,
        Err(err) => return failed_outcome(file, &err, Some(&fp)),
    };
    if copied_hash != fp.sha256 {
        let err = StrataflowError::IntegrityMismatch {
            file: file.file_name.clone(),
            expected: fp.sha256.clone(),
            actual: copied_hash,
        };
        warn!(file = %file.file_name, error = %err, "post-copy verification failed");
        let _ = std::fs::remove_file(&dest);
        return failed_outcome(file, &err, Some(&fp));
    }
    let copy_duration = copy_timer.elapsed().as_secs_f64();

    // Output is durable and verified; only now may state advance.
    let commit = store.commit(
        &key,
        DatasetState {
            source_path: file.source_path.clone(),
            mtime_utc: fp.mtime_utc,
            sha256: fp.sha256.clone(),
            size_bytes: fp.size_bytes,
            last_run_id: run_id.clone(),
        },
    );
    if let Err(err) = commit {
        // The copy is good but the watermark did not advance; the file will
        // be re-copied next run, which is safe because ingestion is
        // idempotent.
        warn!(file = %file.file_name, error = %err, "state commit failed");
        return failed_outcome(file, &err, Some(&fp));
    }

    info!(
        file = %file.file_name,
        dataset = %file.dataset,
        rows,
        read_s = read_duration,
        copy_s = copy_duration,
        "copied"
    );
    FileOutcome {
        file: file.file_name.clone(),
        dataset: file.dataset.clone(),
        source_path: file.source_path.clone(),
        status: FileStatus::Copied,
        mtime_utc: Some(fp.mtime_utc),
        sha256: Some(fp.sha256),
        size_bytes: Some(fp.size_bytes),
        rows: Some(rows),
        schema,
        schema_warning,
        read_duration_s: Some(read_duration),
        copy_duration_s: Some(copy_duration),
    }
}

fn failed_outcome(
    file: &DiscoveredFile,
    err: &StrataflowError,
    fp: Option<&crate::fingerprint::Fingerprint>,
) -> FileOutcome {
    FileOutcome {
        file: file.file_name.clone(),
        dataset: file.dataset.clone(),
        source_path: file.source_path.clone(),
        status: FileStatus::Failed {
            error_type: err.error_type().into(),
            message: err.to_string(),
        },
        mtime_utc: fp.map(|f| f.mtime_utc),
        sha256: fp.map(|f| f.sha256.clone()),
        size_bytes: fp.map(|f| f.size_bytes),
        rows: None,
        schema: vec![],
        schema_warning: None,
        read_duration_s: None,
        copy_duration_s: None,
    }
}

/// Row count (header excluded) and header columns of a delimited file.
fn read_table_stats(path: &Path) -> Result<(u64, Vec<String>)> {
    let file_label = path.display().to_string();
    let mut reader =
        csv::Reader::from_path(path).map_err(|e| StrataflowError::csv(&file_label, e.to_string()))?;
    let schema: Vec<String> = reader
        .headers()
        .map_err(|e| StrataflowError::csv(&file_label, e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = 0u64;
    for record in reader.records() {
        record.map_err(|e| StrataflowError::csv(&file_label, e.to_string()))?;
        rows += 1;
    }
    Ok((rows, schema))
}

/// Declared-schema check: recorded as a warning, never fatal.
fn check_schema(expected: &[String], actual: &[String]) -> Option<String> {
    if expected.is_empty() {
        return None;
    }
    let missing: Vec<&str> = expected
        .iter()
        .filter(|col| !actual.contains(col))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(format!("missing declared columns: {}", missing.join(", ")))
    }
}

fn summarize(outcomes: &[FileOutcome]) -> IngestSummary {
    let copied = outcomes.iter().filter(|o| o.status.is_copied()).count() as u64;
    let failed = outcomes.iter().filter(|o| o.status.is_failed()).count() as u64;
    let total = outcomes.len() as u64;
    IngestSummary {
        files_total: total,
        files_copied: copied,
        files_unchanged: total - copied - failed,
        files_failed: failed,
        no_new_data: total > 0 && copied == 0 && failed == 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strataflow_shared::PathsConfig;

    fn test_config(root: &Path) -> AppConfig {
        AppConfig {
            paths: PathsConfig {
                source_root: root.join("sources"),
                artifact_root: root.join("artifacts"),
            },
            datasets: vec![
                DatasetSpec {
                    name: "orders".into(),
                    pattern: "orders*.csv".into(),
                    exclude: None,
                    expected_schema: vec![],
                },
                DatasetSpec {
                    name: "customers".into(),
                    pattern: "customers.csv".into(),
                    exclude: None,
                    expected_schema: vec![],
                },
            ],
            ..Default::default()
        }
    }

    fn write_sources(root: &Path) {
        let sources = root.join("sources");
        std::fs::create_dir_all(&sources).unwrap();
        let orders: String = std::iter::once("order_id,customer_id,amount".to_string())
            .chain((1..=10).map(|i| format!("{i},{},{}.50", i % 3, i * 10)))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(sources.join("orders.csv"), orders).unwrap();
        let customers: String = std::iter::once("customer_id,name".to_string())
            .chain((1..=5).map(|i| format!("{i},customer {i}")))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(sources.join("customers.csv"), customers).unwrap();
    }

    fn statuses(report: &IngestReport) -> Vec<(String, &'static str)> {
        report
            .metadata
            .tables
            .values()
            .map(|o| {
                let label = match o.status {
                    FileStatus::Copied => "copied",
                    FileStatus::Unchanged => "unchanged",
                    FileStatus::Failed { .. } => "failed",
                };
                (o.file.clone(), label)
            })
            .collect()
    }

    #[tokio::test]
    async fn first_run_copies_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let config = test_config(dir.path());

        let report = run_ingest(&config, None).await.unwrap();
        assert_eq!(report.metadata.summary.files_total, 2);
        assert_eq!(report.metadata.summary.files_copied, 2);
        assert!(!report.no_new_data());

        // Snapshot contains byte-identical copies plus the metadata doc.
        let data_dir = report.run_dir.join("data");
        assert!(data_dir.join("orders.csv").exists());
        assert!(data_dir.join("customers.csv").exists());
        assert!(data_dir.join("metadata.json").exists());
        assert!(report.run_dir.join("reports").join("ingest_report.md").exists());

        // Row/schema snapshot captured for copied files.
        let orders = &report.metadata.tables["orders/orders.csv"];
        assert_eq!(orders.rows, Some(10));
        assert_eq!(orders.schema, vec!["order_id", "customer_id", "amount"]);
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let config = test_config(dir.path());

        run_ingest(&config, None).await.unwrap();
        let state_before =
            std::fs::read_to_string(config.ingest_state_path()).unwrap();

        let second = run_ingest(&config, None).await.unwrap();
        assert!(second.no_new_data());
        assert_eq!(second.metadata.summary.files_copied, 0);
        assert_eq!(second.metadata.summary.files_unchanged, 2);

        // State document untouched by a no-op run.
        let state_after =
            std::fs::read_to_string(config.ingest_state_path()).unwrap();
        assert_eq!(state_before, state_after);

        // Nothing copied into the second snapshot.
        assert!(!second.run_dir.join("data").join("orders.csv").exists());
    }

    #[tokio::test]
    async fn changed_file_is_recopied_others_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let config = test_config(dir.path());

        run_ingest(&config, None).await.unwrap();

        std::fs::write(
            config.paths.source_root.join("orders.csv"),
            "order_id,customer_id,amount\n99,1,123.00\n",
        )
        .unwrap();

        let third = run_ingest(&config, None).await.unwrap();
        assert!(!third.no_new_data());
        let statuses = statuses(&third);
        assert!(statuses.contains(&("orders.csv".into(), "copied")));
        assert!(statuses.contains(&("customers.csv".into(), "unchanged")));
    }

    #[tokio::test]
    async fn touched_mtime_with_same_content_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let config = test_config(dir.path());

        run_ingest(&config, None).await.unwrap();

        // Rewrite identical bytes: mtime moves, hash does not.
        let path = config.paths.source_root.join("customers.csv");
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let report = run_ingest(&config, None).await.unwrap();
        assert!(report.no_new_data());
        assert_eq!(report.metadata.summary.files_unchanged, 2);
    }

    #[tokio::test]
    async fn bad_file_does_not_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let mut config = test_config(dir.path());
        config.datasets.push(DatasetSpec {
            name: "broken".into(),
            pattern: "broken.csv".into(),
            exclude: None,
            expected_schema: vec![],
        });
        // Ragged row: table stats read fails, classification is `failed`.
        std::fs::write(
            config.paths.source_root.join("broken.csv"),
            "a,b\n1,2,3,4\n",
        )
        .unwrap();

        let report = run_ingest(&config, None).await.unwrap();
        assert_eq!(report.metadata.summary.files_total, 3);
        assert_eq!(report.metadata.summary.files_copied, 2);
        assert_eq!(report.metadata.summary.files_failed, 1);
        assert!(!report.no_new_data());

        // The failed file never advanced the watermark.
        let store = StateStore::load_from(&config.ingest_state_path()).unwrap();
        assert!(store.get("broken/broken.csv").is_none());
        assert!(store.get("orders/orders.csv").is_some());
    }

    #[tokio::test]
    async fn missing_source_root_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let err = run_ingest(&config, None).await.unwrap_err();
        assert_eq!(err.error_type(), "precondition_failure");
    }

    #[tokio::test]
    async fn committed_state_matches_output_hash() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let config = test_config(dir.path());

        let report = run_ingest(&config, None).await.unwrap();
        let store = StateStore::load_from(&config.ingest_state_path()).unwrap();

        for file in ["orders.csv", "customers.csv"] {
            let dataset = file.strip_suffix(".csv").unwrap();
            let rec = store.get(&format!("{dataset}/{file}")).unwrap();
            let output = report.run_dir.join("data").join(file);
            assert_eq!(rec.sha256, sha256_file(&output).unwrap());
            assert_eq!(rec.last_run_id, report.run_id);
        }
    }

    #[tokio::test]
    async fn exclude_glob_and_schema_warning() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let mut config = test_config(dir.path());
        config.datasets[0].exclude = Some("orders_backup.csv".into());
        config.datasets[0].expected_schema =
            vec!["order_id".into(), "region".into()];
        std::fs::write(
            config.paths.source_root.join("orders_backup.csv"),
            "order_id\n1\n",
        )
        .unwrap();

        let report = run_ingest(&config, None).await.unwrap();
        assert_eq!(report.metadata.summary.files_total, 2);
        let orders = &report.metadata.tables["orders/orders.csv"];
        assert_eq!(
            orders.schema_warning.as_deref(),
            Some("missing declared columns: region")
        );
    }

    #[tokio::test]
    async fn fixed_run_id_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let config = test_config(dir.path());

        let id: RunId = "20240101_000000_#deadbeef".parse().unwrap();
        let report = run_ingest(&config, Some(id.clone())).await.unwrap();
        assert_eq!(report.run_id, id);
        assert!(report.run_dir.ends_with("raw/20240101_000000_#deadbeef"));
    }
}
