//! CLI argument parsing for hpcload

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for analysis reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "hpcload")]
#[command(version)]
#[command(about = "HPC workload synthesizer and completed-trace analyzer", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synthesize a workload and write it as a binary job trace
    Generate(GenerateArgs),
    /// Analyze a completed trace (CSV or JSON)
    Analyze(AnalyzeArgs),
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    /// Experiment configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Directory of workflow manifests (overrides workflows.manifest_dir)
    #[arg(short, long, value_name = "DIR")]
    pub manifests: Option<PathBuf>,

    /// Binary trace for the scheduler simulator
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Also save the jobs as CSV or JSON (by extension)
    #[arg(long, value_name = "FILE")]
    pub dump: Option<PathBuf>,

    /// Fill start/end times in the dump as if capacity were unlimited
    #[arg(long, requires = "dump")]
    pub replay: bool,

    /// Override the configured RNG seed
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// Completed trace (.csv or .json)
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Machine capacity in cores
    #[arg(long, value_name = "CORES")]
    pub capacity: u32,

    /// Directory of workflow manifests referenced by the trace
    #[arg(short, long, value_name = "DIR")]
    pub manifests: Option<PathBuf>,

    /// Jobs starting earlier only pre-load utilization
    #[arg(long, value_name = "EPOCH")]
    pub start_cut: Option<i64>,

    /// Jobs starting at or after this are left out of utilization
    #[arg(long, value_name = "EPOCH")]
    pub end_cut: Option<i64>,

    /// Include full utilization timelines (JSON output)
    #[arg(long)]
    pub timeline: bool,

    /// Report format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}
