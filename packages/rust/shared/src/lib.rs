//! Shared domain types, configuration, and error handling for Strataflow.

pub mod config;
pub mod error;
pub mod fsio;
pub mod runid;
pub mod types;

pub use config::{
    AggregateOp, AggregateSpec, AppConfig, DatasetSpec, IngestConfig, MartSpec,
    OrchestratorConfig, PathsConfig, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{Result, StrataflowError};
pub use runid::RunId;
pub use types::{
    FileOutcome, FileStatus, Layer, PipelineSummary, SkipReason, StageOutcome, StepResult,
};
