use anyhow::{Context, Result};
use clap::Parser;
use hpcload::analysis::{analyze, AnalysisOptions};
use hpcload::cli::{AnalyzeArgs, Cli, Command, GenerateArgs, OutputFormat};
use hpcload::config::ExperimentConfig;
use hpcload::job::Trace;
use hpcload::manifest::ManifestRegistry;
use hpcload::synth::Synthesizer;
use hpcload::trace_format::{RecordLayout, TraceWriter};
use hpcload::trace_io;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Load every manifest in `dir`, or an empty registry without one
fn load_manifests(dir: Option<&Path>) -> Result<ManifestRegistry> {
    match dir {
        Some(dir) => ManifestRegistry::load_dir(dir)
            .with_context(|| format!("failed to load manifests from {}", dir.display())),
        None => Ok(ManifestRegistry::new()),
    }
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let mut config = ExperimentConfig::from_file(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    // manifest_dir in the config is relative to the config file
    let manifest_dir: Option<PathBuf> = args.manifests.clone().or_else(|| {
        let dir = config.workflows.as_ref()?.manifest_dir.as_ref()?;
        let base = args.config.parent().unwrap_or_else(|| Path::new("."));
        Some(base.join(dir))
    });
    let registry = load_manifests(manifest_dir.as_deref())?;

    let mut synth = Synthesizer::from_config(&config, &registry).context("invalid experiment")?;
    let jobs = synth.run().context("workload synthesis failed")?;

    let file = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let layout = RecordLayout {
        cores_per_node: config.system.cores_per_node,
    };
    let mut writer = TraceWriter::new(BufWriter::new(file), layout);
    let written = writer.write_all(&jobs)?;
    writer.into_inner()?;
    eprintln!("Wrote {} jobs to {}", written, args.output.display());

    if let Some(dump) = &args.dump {
        let mut trace = Trace::new(jobs);
        if args.replay {
            trace.replay_unconstrained();
        }
        trace_io::save_trace(dump, trace.jobs())?;
        eprintln!("Saved job list to {}", dump.display());
    }
    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let trace = trace_io::load_trace(&args.trace)?;
    let registry = load_manifests(args.manifests.as_deref())?;
    let options = AnalysisOptions {
        capacity_cores: args.capacity,
        start_cut: args.start_cut,
        end_cut: args.end_cut,
        include_timeline: args.timeline,
    };
    let report = analyze(&trace, &registry, &options)
        .with_context(|| format!("failed to analyze {}", args.trace.display()))?;

    let rendered = match args.format {
        OutputFormat::Text => report.render_text(),
        OutputFormat::Json => report.to_json()?,
    };
    match &args.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write report {}", path.display()))?,
        None => println!("{}", rendered),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Generate(generate) => run_generate(generate),
        Command::Analyze(analyze_args) => run_analyze(analyze_args),
    }
}
