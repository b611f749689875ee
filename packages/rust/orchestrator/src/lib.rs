//! Stage orchestration: the fixed ingest → standardize → aggregate
//! sequence, each stage run as an isolated subprocess with explicit
//! skip/fail propagation and a truthful pipeline summary.

pub mod orchestrate;
pub mod runner;
pub mod stage;

pub use orchestrate::{PipelineOptions, PipelineProgress, SilentProgress, run_pipeline};
pub use runner::{StageInvocation, run_stage};
pub use stage::{STAGES, Stage, decide_skip};
