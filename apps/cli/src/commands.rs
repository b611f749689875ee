//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use strataflow_orchestrator::{PipelineOptions, PipelineProgress, Stage, run_pipeline};
use strataflow_shared::{
    AppConfig, Layer, RunId, StepResult, config_file_path, init_config, load_config,
    load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Strataflow — layered, incremental ELT for local tabular data.
#[derive(Parser)]
#[command(
    name = "strataflow",
    version,
    about = "Ingest tabular sources into layered, auditable run snapshots.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ./strataflow.toml, then ~/.strataflow/).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline: ingest → standardize → aggregate.
    Run {
        /// Fixed orchestration run id (defaults to a fresh id).
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Ingest changed source files into a raw snapshot.
    Ingest {
        /// Fixed output run id (defaults to a fresh id).
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Standardize a raw snapshot (trim, null, date/number normalization).
    Standardize {
        /// Upstream raw run id (defaults to the latest raw run).
        #[arg(long)]
        input_run_id: Option<String>,

        /// Fixed output run id (defaults to a derived id).
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Build business-ready marts from a standardized snapshot.
    Aggregate {
        /// Upstream standardized run id (defaults to the latest run).
        #[arg(long)]
        input_run_id: Option<String>,

        /// Fixed output run id (defaults to a derived id).
        #[arg(long)]
        run_id: Option<String>,
    },

    /// List run ids of a layer, latest last.
    Runs {
        /// Layer to list: raw, standardized, or marts.
        #[arg(long, default_value = "raw")]
        layer: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "strataflow=info",
        1 => "strataflow=debug",
        _ => "strataflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Run { run_id } => cmd_run(config_path, run_id.as_deref()).await,
        Command::Ingest { run_id } => cmd_ingest(config_path, run_id.as_deref()).await,
        Command::Standardize {
            input_run_id,
            run_id,
        } => cmd_standardize(config_path, input_run_id.as_deref(), run_id.as_deref()).await,
        Command::Aggregate {
            input_run_id,
            run_id,
        } => cmd_aggregate(config_path, input_run_id.as_deref(), run_id.as_deref()).await,
        Command::Runs { layer } => cmd_runs(config_path, &layer),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config from the explicit path or the default locations.
fn resolve_config(explicit: &Option<PathBuf>) -> Result<AppConfig> {
    match explicit {
        Some(path) => Ok(load_config_from(path)?),
        None => Ok(load_config()?),
    }
}

fn parse_run_id(value: Option<&str>) -> Result<Option<RunId>> {
    value
        .map(|s| s.parse::<RunId>().map_err(|e| eyre!(e)))
        .transpose()
}

fn parse_layer(value: &str) -> Result<Layer> {
    match value {
        "raw" => Ok(Layer::Raw),
        "standardized" => Ok(Layer::Standardized),
        "marts" => Ok(Layer::Marts),
        other => Err(eyre!(
            "unknown layer '{other}' (expected raw, standardized, or marts)"
        )),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<PathBuf>, run_id: Option<&str>) -> Result<()> {
    let config = resolve_config(&config_path)?;
    let run_id = parse_run_id(run_id)?;

    let program = std::env::current_exe()
        .map_err(|e| eyre!("cannot determine current executable: {e}"))?;
    let options = PipelineOptions {
        program,
        config_path,
        run_id,
    };

    let reporter = CliProgress::new();
    let summary = run_pipeline(&config, &options, &reporter).await?;
    reporter.finish();

    println!();
    println!(
        "  Pipeline {}: {}",
        summary.run_id,
        if summary.success { "success" } else { "FAILED" }
    );
    for step in &summary.steps {
        println!(
            "    {:<12} {:<10} {:>8.3}s",
            step.name,
            step.outcome.label(),
            step.duration_s
        );
    }
    if let Some(id) = &summary.raw_run_id {
        println!("  raw run:          {id}");
    }
    if let Some(id) = &summary.standardized_run_id {
        println!("  standardized run: {id}");
    }
    if let Some(id) = &summary.marts_run_id {
        println!("  marts run:        {id}");
    }
    println!();

    if summary.success {
        Ok(())
    } else {
        Err(eyre!("pipeline run {} failed", summary.run_id))
    }
}

async fn cmd_ingest(config_path: Option<PathBuf>, run_id: Option<&str>) -> Result<()> {
    let config = resolve_config(&config_path)?;
    let run_id = parse_run_id(run_id)?;

    let report = strataflow_ingest::run_ingest(&config, run_id).await?;

    // One machine-readable result line; lands in the stage log under
    // orchestration.
    println!(
        "{}",
        serde_json::json!({
            "run_id": report.run_id,
            "files_total": report.metadata.summary.files_total,
            "files_copied": report.metadata.summary.files_copied,
            "files_unchanged": report.metadata.summary.files_unchanged,
            "files_failed": report.metadata.summary.files_failed,
            "no_new_data": report.no_new_data(),
        })
    );
    Ok(())
}

async fn cmd_standardize(
    config_path: Option<PathBuf>,
    input_run_id: Option<&str>,
    run_id: Option<&str>,
) -> Result<()> {
    let config = resolve_config(&config_path)?;
    let input_run_id = parse_run_id(input_run_id)?;
    let run_id = parse_run_id(run_id)?;

    let report = strataflow_transform::run_standardize(&config, input_run_id, run_id).await?;
    print_transform_result(&report);
    Ok(())
}

async fn cmd_aggregate(
    config_path: Option<PathBuf>,
    input_run_id: Option<&str>,
    run_id: Option<&str>,
) -> Result<()> {
    let config = resolve_config(&config_path)?;
    let input_run_id = parse_run_id(input_run_id)?;
    let run_id = parse_run_id(run_id)?;

    let report = strataflow_transform::run_aggregate(&config, input_run_id, run_id).await?;
    print_transform_result(&report);
    Ok(())
}

fn print_transform_result(report: &strataflow_transform::TransformReport) {
    println!(
        "{}",
        serde_json::json!({
            "run_id": report.run_id,
            "input_run_id": report.metadata.run.input_run_id,
            "tables_total": report.metadata.summary.tables_total,
            "tables_succeeded": report.metadata.summary.tables_succeeded,
            "tables_failed": report.metadata.summary.tables_failed,
        })
    );
}

fn cmd_runs(config_path: Option<PathBuf>, layer: &str) -> Result<()> {
    let config = resolve_config(&config_path)?;
    let layer = parse_layer(layer)?;
    let root = config.layer_root(layer);

    let mut run_ids: Vec<RunId> = Vec::new();
    if root.is_dir() {
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = name.parse::<RunId>() {
                    run_ids.push(id);
                }
            }
        }
    }
    run_ids.sort();

    if run_ids.is_empty() {
        println!("no runs under {}", root.display());
        return Ok(());
    }
    for id in &run_ids {
        println!("{id}");
    }
    info!(layer = %layer, count = run_ids.len(), "listed runs");
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("created {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(&config_path)?;
    let path = match &config_path {
        Some(p) => p.clone(),
        None => config_file_path()?,
    };
    println!("# resolved from {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Pipeline progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl PipelineProgress for CliProgress {
    fn stage_started(&self, stage: Stage) {
        self.spinner.set_message(format!("Running {stage} stage"));
    }

    fn stage_finished(&self, step: &StepResult) {
        self.spinner
            .println(format!("  {} {}", step.name, step.outcome.label()));
    }
}
