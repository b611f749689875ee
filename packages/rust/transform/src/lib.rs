//! Transform stages: standardize (raw → standardized) and aggregate
//! (standardized → marts).

pub mod aggregate;
pub mod resolve;
pub mod standardize;
pub mod table;

pub use aggregate::run_aggregate;
pub use resolve::resolve_input_run;
pub use standardize::run_standardize;
pub use table::{Table, list_tables, read_table, write_table};

use std::path::PathBuf;

use strataflow_report::TransformMetadata;
use strataflow_shared::RunId;

/// Result of one transform stage run.
#[derive(Debug)]
pub struct TransformReport {
    pub run_id: RunId,
    pub run_dir: PathBuf,
    pub metadata: TransformMetadata,
}
