use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, warn};

use simpipe_core::ScriptConfig;

/// Stateless descriptor of one external figure script. One job becomes one
/// subprocess per pipeline invocation; the script receives the whole run set
/// so it can draw its own comparison lines.
#[derive(Debug, Clone)]
pub struct ScriptJob {
    pub display_name: String,
    pub script_path: PathBuf,
    pub extra_args: Vec<String>,
}

impl ScriptJob {
    pub fn from_config(script: &ScriptConfig, config_directory: &Path) -> ScriptJob {
        ScriptJob {
            display_name: script.filename.clone(),
            script_path: config_directory.join(&script.filename),
            extra_args: script.additional_argument_list(),
        }
    }
}

/// Arguments shared by every script in a dispatch: the full run set plus the
/// common directories. Copied into each child's argv, never shared in
/// process.
#[derive(Debug, Clone)]
pub struct ScriptArguments {
    pub snapshots: Vec<String>,
    pub catalogues: Vec<String>,
    pub input_directories: Vec<PathBuf>,
    pub run_names: Vec<String>,
    pub output_directory: PathBuf,
    pub config_directory: PathBuf,
}

/// Timing record for one script invocation. `elapsed_seconds` covers the
/// child process lifetime only, not dispatcher overhead.
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub script_name: String,
    pub elapsed_seconds: f64,
    pub failure: Option<String>,
}

impl ScriptResult {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Everything the statistics reporter needs after the completion barrier.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub results: Vec<ScriptResult>,
    /// End-to-end wall time of the whole dispatch.
    pub wall_seconds: f64,
}

impl DispatchReport {
    pub fn empty() -> DispatchReport {
        DispatchReport {
            results: Vec::new(),
            wall_seconds: 0.0,
        }
    }

    /// Sum of per-script times; compared against `wall_seconds` to expose
    /// parallel efficiency loss.
    pub fn total_script_seconds(&self) -> f64 {
        self.results.iter().map(|r| r.elapsed_seconds).sum()
    }

    pub fn failures(&self) -> Vec<&ScriptResult> {
        self.results.iter().filter(|r| !r.succeeded()).collect()
    }
}

/// Runs every job exactly once on a bounded worker pool and blocks until all
/// of them have finished. There is no ordering between jobs and no
/// cancellation: a failing script is recorded and its siblings keep running.
pub fn run_scripts(
    jobs: &[ScriptJob],
    arguments: &ScriptArguments,
    workers: usize,
) -> Result<DispatchReport> {
    if jobs.is_empty() {
        return Ok(DispatchReport::empty());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("failed to build script worker pool")?;

    let started = Instant::now();
    let results: Vec<ScriptResult> =
        pool.install(|| jobs.par_iter().map(|job| run_one(job, arguments)).collect());
    let wall_seconds = started.elapsed().as_secs_f64();

    Ok(DispatchReport {
        results,
        wall_seconds,
    })
}

fn run_one(job: &ScriptJob, arguments: &ScriptArguments) -> ScriptResult {
    let mut cmd = Command::new(&job.script_path);
    cmd.arg("-s").args(&arguments.snapshots);
    cmd.arg("-c").args(&arguments.catalogues);
    cmd.arg("-d").args(&arguments.input_directories);
    cmd.arg("-n").args(&arguments.run_names);
    cmd.arg("-o").arg(&arguments.output_directory);
    cmd.arg("-C").arg(&arguments.config_directory);
    cmd.args(&job.extra_args);

    debug!(script = %job.display_name, "dispatching script");
    let started = Instant::now();
    let status = cmd.status();
    let elapsed_seconds = started.elapsed().as_secs_f64();

    let failure = match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("exited with {status}")),
        Err(err) => Some(format!("failed to spawn: {err}")),
    };
    if let Some(reason) = &failure {
        warn!(
            script = job.display_name.as_str(),
            reason = reason.as_str(),
            "script failed; continuing with siblings"
        );
    }

    ScriptResult {
        script_name: job.display_name.clone(),
        elapsed_seconds,
        failure,
    }
}
