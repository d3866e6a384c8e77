//! vblend CLI - layer-wise blending of voice-conversion checkpoints.

mod progress;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use vblend_batch::{read_table, BatchReport, BatchRunner, CliInvocation};
use vblend_merge::{
    run_blend, BlendBuilder, BlendRequest, BlendRule, Checkpoint, CheckpointSummary,
    SafetensorsStore, StoragePrecision, TracingObserver,
};

use crate::progress::ProgressObserver;

/// Storage format of blended parameters.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PrecisionArg {
    /// 32-bit float
    F32,
    /// 16-bit float
    F16,
    /// 16-bit brain float
    Bf16,
}

impl From<PrecisionArg> for StoragePrecision {
    fn from(arg: PrecisionArg) -> Self {
        match arg {
            PrecisionArg::F32 => StoragePrecision::F32,
            PrecisionArg::F16 => StoragePrecision::F16,
            PrecisionArg::Bf16 => StoragePrecision::BF16,
        }
    }
}

#[derive(Parser)]
#[command(name = "vblend")]
#[command(author, version, about = "Blend two voice-conversion checkpoints layer by layer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Blend two checkpoints into a new one
    Blend {
        /// YAML blend request; the flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output checkpoint path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Primary checkpoint
        #[arg(long)]
        model1: Option<PathBuf>,

        /// Speaker index of the primary checkpoint
        #[arg(long)]
        sid1: Option<i64>,

        /// Secondary checkpoint
        #[arg(long)]
        model2: Option<PathBuf>,

        /// Speaker index of the secondary checkpoint
        #[arg(long)]
        sid2: Option<i64>,

        /// Layer rule as PATTERN=WEIGHT; repeat for more, later rules win
        #[arg(long = "rule", value_parser = parse_rule)]
        rules: Vec<BlendRule>,

        /// Weight of the primary model for layers no rule matches
        #[arg(long)]
        default_weight: Option<f32>,

        /// Storage precision of the result
        #[arg(long, value_enum)]
        precision: Option<PrecisionArg>,

        /// Blend layers in parallel
        #[arg(long)]
        parallel: bool,

        /// Plain log output instead of a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Print the metadata and parameter shapes of a checkpoint
    Inspect {
        /// Checkpoint path
        path: PathBuf,
    },

    /// Run one blend per row of a CSV/TSV/spreadsheet table
    BatchBlend {
        /// Table with output_path, model1_path, model1_sid, model2_path,
        /// model2_sid, blend_rules and default_weight columns
        table: PathBuf,

        /// Stop at the first failing row
        #[arg(long)]
        fail_fast: bool,
    },

    /// Run a command once per table row, passing cells as --column value
    BatchCli {
        /// Table whose header row names the flags
        table: PathBuf,

        /// Stop at the first failing row
        #[arg(long)]
        fail_fast: bool,

        /// Base command, e.g. `-- python tools/infer_cli.py`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn parse_rule(s: &str) -> Result<BlendRule, String> {
    let (pattern, weight) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected PATTERN=WEIGHT, got '{s}'"))?;
    let weight: f32 = weight
        .trim()
        .parse()
        .map_err(|e| format!("invalid weight in '{s}': {e}"))?;
    Ok(BlendRule::new(pattern.trim(), weight))
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Blend {
            config,
            output,
            model1,
            sid1,
            model2,
            sid2,
            rules,
            default_weight,
            precision,
            parallel,
            no_progress,
        } => {
            let request = match config {
                Some(path) => {
                    let mut request = BlendRequest::from_yaml_file(&path)
                        .with_context(|| format!("Failed to read blend config {}", path.display()))?;
                    if let Some(output) = output {
                        request.output_path = output;
                    }
                    if let Some(model1) = model1 {
                        request.primary.path = model1;
                    }
                    if let Some(sid1) = sid1 {
                        request.primary.identity_index = sid1;
                    }
                    if let Some(model2) = model2 {
                        request.secondary.path = model2;
                    }
                    if let Some(sid2) = sid2 {
                        request.secondary.identity_index = sid2;
                    }
                    request.rules.extend(rules);
                    if let Some(weight) = default_weight {
                        request.default_weight = weight;
                    }
                    if let Some(precision) = precision {
                        request.precision = precision.into();
                    }
                    request.parallel |= parallel;
                    request
                }
                None => {
                    let (Some(output), Some(model1), Some(model2)) = (output, model1, model2) else {
                        bail!("--output, --model1 and --model2 are required without --config");
                    };
                    let mut builder = BlendBuilder::new()
                        .output(output)
                        .primary(model1, sid1.unwrap_or(0))
                        .secondary(model2, sid2.unwrap_or(0))
                        .parallel(parallel);
                    for rule in rules {
                        builder = builder.rule(rule.pattern, rule.weight);
                    }
                    if let Some(weight) = default_weight {
                        builder = builder.default_weight(weight);
                    }
                    if let Some(precision) = precision {
                        builder = builder.precision(precision.into());
                    }
                    builder.build()?
                }
            };

            run_blend_command(&request, no_progress)?;
        }

        Commands::Inspect { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let checkpoint = Checkpoint::from_safetensors_bytes(&bytes)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            println!("========================================");
            println!("  {}", path.display());
            println!("========================================");
            print!("{}", CheckpointSummary::from_checkpoint(&checkpoint));
        }

        Commands::BatchBlend { table, fail_fast } => {
            let rows = read_table(&table)?;
            println!("========================================");
            println!("  vblend Batch Blend");
            println!("========================================");
            println!("Table:     {}", table.display());
            println!("Rows:      {}", rows.len());
            println!("Fail fast: {}", fail_fast);
            println!("========================================\n");

            let report = BatchRunner::new().fail_fast(fail_fast).run_blends(
                &rows,
                &SafetensorsStore::new(),
                &TracingObserver::default(),
            );
            finish_batch(&report)?;
        }

        Commands::BatchCli {
            table,
            fail_fast,
            command,
        } => {
            let invocation = CliInvocation::new(command)?;
            let rows = read_table(&table)?;
            println!("========================================");
            println!("  vblend Batch CLI");
            println!("========================================");
            println!("Table:     {}", table.display());
            println!("Rows:      {}", rows.len());
            println!("Fail fast: {}", fail_fast);
            println!("========================================\n");

            let report = BatchRunner::new()
                .fail_fast(fail_fast)
                .run_cli(&invocation, &rows);
            finish_batch(&report)?;
        }
    }

    Ok(())
}

fn run_blend_command(request: &BlendRequest, no_progress: bool) -> anyhow::Result<()> {
    println!("========================================");
    println!("  vblend Checkpoint Blend");
    println!("========================================");
    println!("Model 1:        {} (sid {})", request.primary.path.display(), request.primary.identity_index);
    println!("Model 2:        {} (sid {})", request.secondary.path.display(), request.secondary.identity_index);
    println!("Output:         {}", request.output_path.display());
    println!("Rules:          {}", request.rules.len());
    for rule in &request.rules {
        println!("  {} = {}", rule.pattern, rule.weight);
    }
    println!("Default weight: {}", request.default_weight);
    println!("Precision:      {}", request.precision);
    println!("Parallel:       {}", request.parallel);
    println!("========================================\n");

    let store = SafetensorsStore::new();
    let report = if no_progress {
        run_blend(request, &store, &TracingObserver::default())?
    } else {
        run_blend(request, &store, &ProgressObserver::new()?)?
    };

    println!("\n========================================");
    println!("  Blend Complete!");
    println!("========================================");
    println!("Layers blended:    {}", report.layers_blended);
    println!("With layer rules:  {}", report.layers_with_rules);
    println!("Reconciled shapes: {}", report.layers_reconciled);
    if report.dropped_secondary > 0 {
        println!("Dropped (model 2): {}", report.dropped_secondary);
    }
    println!("Output: {}", report.output_path.display());
    println!("{}", report.provenance);

    Ok(())
}

fn finish_batch(report: &BatchReport) -> anyhow::Result<()> {
    println!("\n========================================");
    println!("  Batch Complete: {}", report);
    println!("========================================");
    for failure in report.failures() {
        if let vblend_batch::RowStatus::Failed { error } = &failure.status {
            println!("Line {}: {}", failure.line, error);
        }
    }

    if !report.is_success() {
        bail!("{} of {} rows failed", report.failed(), report.outcomes.len() + report.skipped);
    }
    Ok(())
}
