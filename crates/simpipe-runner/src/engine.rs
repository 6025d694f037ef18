use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use simpipe_core::fsio::atomic_write_bytes;
use simpipe_core::{Config, LineSeries, PlotDefinition};

/// Name and redshift of one run, as recorded by the snapshot tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct RunMetadata {
    pub name: String,
    pub redshift: f64,
}

/// "Load run metadata" collaborator: resolves a run's display name and
/// redshift from its catalogue/snapshot pair.
pub trait RunMetadataLoader {
    fn load(&self, input_directory: &Path, catalogue: &str, snapshot: &str)
        -> Result<RunMetadata>;
}

/// "Compute and render figure set" / "recreate figure" collaborator.
pub trait FigureEngine {
    /// Compute the full plot set for one run. Renders figure files into
    /// `output_directory` unless `render` is false (no-plots mode), in which
    /// case only the plot definitions and line data are produced.
    fn compute_figures(
        &self,
        input_directory: &Path,
        catalogue: &str,
        snapshot: &str,
        output_directory: &Path,
        render: bool,
    ) -> Result<Vec<PlotDefinition>>;

    /// Redraw a single figure from persisted line data, overlaying one line
    /// set per run.
    fn recreate_figure(
        &self,
        plot: &PlotDefinition,
        runs: &[(String, Vec<LineSeries>)],
        output_directory: &Path,
    ) -> Result<()>;
}

/// Reads `<input_dir>/<snapshot stem>.meta.yml`, the sidecar written by the
/// snapshot conversion tooling.
pub struct SidecarMetadataLoader;

impl RunMetadataLoader for SidecarMetadataLoader {
    fn load(
        &self,
        input_directory: &Path,
        _catalogue: &str,
        snapshot: &str,
    ) -> Result<RunMetadata> {
        let stem = Path::new(snapshot)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("snapshot name is not valid UTF-8: {snapshot}"))?;
        let path = input_directory.join(format!("{stem}.meta.yml"));
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("run metadata sidecar not found: {}", path.display()))?;
        let metadata: RunMetadata = serde_yaml::from_str(&raw)
            .with_context(|| format!("malformed run metadata sidecar: {}", path.display()))?;
        Ok(metadata)
    }
}

/// Environment variable through which the plotter child reports its computed
/// plot manifest back to the pipeline.
pub const PLOT_MANIFEST_ENV: &str = "SIMPIPE_PLOT_MANIFEST";
/// Environment variable pointing the plotter child at persisted line data
/// during figure recreation.
pub const LINE_DATA_ENV: &str = "SIMPIPE_LINE_DATA";
const RENDER_ENV: &str = "SIMPIPE_RENDER";
const SPECIAL_MODE_ENV: &str = "SIMPIPE_SPECIAL_MODE";

#[derive(Serialize)]
struct RecreateRequest<'a> {
    plot: &'a PlotDefinition,
    runs: Vec<RecreateRun<'a>>,
}

#[derive(Serialize)]
struct RecreateRun<'a> {
    name: &'a str,
    lines: &'a [LineSeries],
}

/// Process-backed `FigureEngine`: shells out to the `plotter_command`
/// configured in `config.yml`. The child is handed the run arguments on the
/// command line and exchanges plot metadata through files named in
/// environment variables, so the plotting side can be written in any
/// language.
pub struct PlotterProcess {
    command: Vec<String>,
    config_directory: PathBuf,
    special_mode: Option<String>,
}

impl PlotterProcess {
    pub fn from_config(config: &Config, special_mode: Option<&str>) -> Result<PlotterProcess> {
        let command = config
            .plotter_command
            .clone()
            .ok_or(simpipe_core::ConfigError::MissingPlotterCommand)?;
        if command.is_empty() {
            return Err(simpipe_core::ConfigError::MissingPlotterCommand.into());
        }
        Ok(PlotterProcess {
            command,
            config_directory: config.config_directory.clone(),
            special_mode: special_mode.map(str::to_string),
        })
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        if let Some(mode) = &self.special_mode {
            cmd.env(SPECIAL_MODE_ENV, mode);
        }
        cmd
    }
}

impl FigureEngine for PlotterProcess {
    fn compute_figures(
        &self,
        input_directory: &Path,
        catalogue: &str,
        snapshot: &str,
        output_directory: &Path,
        render: bool,
    ) -> Result<Vec<PlotDefinition>> {
        let manifest_path = output_directory.join(format!(
            ".plot_manifest_{}_{}.yml",
            std::process::id(),
            Path::new(snapshot)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("snapshot")
        ));

        let mut cmd = self.base_command();
        cmd.arg("compute")
            .args(["-s", snapshot])
            .args(["-c", catalogue])
            .arg("-d")
            .arg(input_directory)
            .arg("-o")
            .arg(output_directory)
            .arg("-C")
            .arg(&self.config_directory)
            .env(PLOT_MANIFEST_ENV, &manifest_path)
            .env(RENDER_ENV, if render { "1" } else { "0" });

        debug!(snapshot, render, "invoking plotter");
        let status = cmd
            .status()
            .with_context(|| format!("failed to spawn plotter: {}", self.command[0]))?;
        if !status.success() {
            return Err(anyhow!("plotter exited with {status} for {snapshot}"));
        }

        let raw = fs::read_to_string(&manifest_path).with_context(|| {
            format!(
                "plotter wrote no manifest at {}",
                manifest_path.display()
            )
        })?;
        let plots: Vec<PlotDefinition> = serde_yaml::from_str(&raw)
            .with_context(|| format!("malformed plot manifest: {}", manifest_path.display()))?;
        let _ = fs::remove_file(&manifest_path);
        Ok(plots)
    }

    fn recreate_figure(
        &self,
        plot: &PlotDefinition,
        runs: &[(String, Vec<LineSeries>)],
        output_directory: &Path,
    ) -> Result<()> {
        let request = RecreateRequest {
            plot,
            runs: runs
                .iter()
                .map(|(name, lines)| RecreateRun {
                    name,
                    lines: lines.as_slice(),
                })
                .collect(),
        };
        let line_data_path = output_directory.join(format!(
            ".line_data_{}_{}.yml",
            std::process::id(),
            plot.filename
        ));
        let bytes = serde_yaml::to_string(&request)?;
        atomic_write_bytes(&line_data_path, bytes.as_bytes())?;

        let mut cmd = self.base_command();
        cmd.arg("recreate")
            .args(["--figure", &plot.filename])
            .arg("-o")
            .arg(output_directory)
            .arg("-C")
            .arg(&self.config_directory)
            .env(LINE_DATA_ENV, &line_data_path);

        let status = cmd
            .status()
            .with_context(|| format!("failed to spawn plotter: {}", self.command[0]))?;
        let _ = fs::remove_file(&line_data_path);
        if !status.success() {
            return Err(anyhow!(
                "plotter exited with {status} while recreating {}",
                plot.filename
            ));
        }
        Ok(())
    }
}
