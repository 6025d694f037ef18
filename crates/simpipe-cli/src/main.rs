use anyhow::Result;
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;

use simpipe_core::Config;
use simpipe_runner::{
    run_pipeline, Mode, PipelineArgs, PipelineSummary, PlotterProcess, SidecarMetadataLoader,
};

#[derive(Parser)]
#[command(
    name = "simpipe",
    version,
    about = "Produces diagnostic figure webpages from cosmological simulation outputs"
)]
struct Cli {
    /// Configuration directory containing config.yml
    #[arg(short = 'C', long = "config")]
    config: PathBuf,

    /// Catalogue list, one per run, without directory
    #[arg(short = 'c', long = "catalogues", num_args = 1.., required = true)]
    catalogues: Vec<String>,

    /// Snapshot list, one per run, without directory (e.g. snapshot_0000.hdf5)
    #[arg(short = 's', long = "snapshots", num_args = 1.., required = true)]
    snapshots: Vec<String>,

    /// Input directory list; each contains its run's snapshot and catalogue
    #[arg(short = 'i', long = "input-directories", num_args = 1.., required = true)]
    input_directories: Vec<PathBuf>,

    /// Output directory for figures and the webpage
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Run names for legends; derived from the run metadata when omitted
    #[arg(short = 'n', long = "run-names", num_args = 1..)]
    run_names: Option<Vec<String>>,

    /// Base name of the persisted metadata file
    #[arg(short = 'm', long = "metadata", default_value = "data")]
    metadata: String,

    /// Number of parallel script workers
    #[arg(short = 'j', long = "jobs", default_value_t = num_cpus::get())]
    jobs: usize,

    /// Alternate named pipeline configuration; appended to metadata filenames
    #[arg(long = "special-mode")]
    special_mode: Option<String>,

    /// Skip the external figure scripts
    #[arg(short = 'f', long)]
    fast: bool,

    /// Skip rendering and page assembly; persist metadata only (needs --fast)
    #[arg(long = "no-plots")]
    no_plots: bool,

    #[arg(short = 'd', long)]
    debug: bool,

    /// Emit a machine-readable JSON summary on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let json_mode = cli.json;
    match run(cli) {
        Ok(payload) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json!({
                    "ok": false,
                    "error": { "code": "pipeline_failed", "message": err.to_string() }
                }));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<Option<Value>> {
    let args = PipelineArgs {
        config_directory: cli.config.clone(),
        catalogues: cli.catalogues,
        snapshots: cli.snapshots,
        input_directories: cli.input_directories,
        output_directory: cli.output,
        run_names: cli.run_names,
        metadata_base: cli.metadata,
        jobs: Some(cli.jobs),
        special_mode: cli.special_mode,
        fast: cli.fast,
        no_plots: cli.no_plots,
        debug: cli.debug,
    };
    // Flag combinations are rejected before the config file is even read.
    args.validate()?;

    let config = Config::load(&cli.config)?;
    let engine = PlotterProcess::from_config(&config, args.special_mode.as_deref())?;
    let summary = run_pipeline(&args, &config, &SidecarMetadataLoader, &engine)?;

    if cli.json {
        return Ok(Some(summary_to_json(&summary)));
    }
    print_summary(&summary);
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn summary_to_json(summary: &PipelineSummary) -> Value {
    json!({
        "ok": true,
        "mode": mode_name(summary.mode),
        "runs": summary.run_names,
        "metadata": summary
            .metadata_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>(),
        "scripts": summary
            .scripts
            .results
            .iter()
            .map(|r| {
                json!({
                    "name": r.script_name,
                    "elapsed_seconds": r.elapsed_seconds,
                    "failure": r.failure,
                })
            })
            .collect::<Vec<_>>(),
        "total_script_seconds": summary.scripts.total_script_seconds(),
        "dispatch_wall_seconds": summary.scripts.wall_seconds,
        "skipped_figures": summary.skipped_figures,
        "duplicate_filenames": summary
            .duplicate_filenames
            .iter()
            .map(|(name, count)| json!({ "filename": name, "count": count }))
            .collect::<Vec<_>>(),
        "webpage": summary.webpage.as_ref().map(|p| p.display().to_string()),
    })
}

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::SingleRun => "single_run",
        Mode::Comparison => "comparison",
    }
}

fn print_summary(summary: &PipelineSummary) {
    println!("mode: {}", mode_name(summary.mode));
    println!("runs: {}", summary.run_names.join(", "));
    for path in &summary.metadata_paths {
        println!("metadata: {}", path.display());
    }
    for result in &summary.scripts.results {
        match &result.failure {
            None => println!(
                "script {}: {:.2}s",
                result.script_name, result.elapsed_seconds
            ),
            Some(reason) => println!("script {}: FAILED ({reason})", result.script_name),
        }
    }
    if !summary.scripts.results.is_empty() {
        println!(
            "scripts total: {:.2}s over {:.2}s wall",
            summary.scripts.total_script_seconds(),
            summary.scripts.wall_seconds
        );
    }
    for figure in &summary.skipped_figures {
        println!("skipped figure: {figure}");
    }
    for (filename, count) in &summary.duplicate_filenames {
        println!("duplicate output filename: {filename} ({count} writers)");
    }
    if let Some(webpage) = &summary.webpage {
        println!("webpage: {}", webpage.display());
    }
}
