use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use simpipe_core::fsio::ensure_dir;
use simpipe_core::{Config, MetadataRecord, RunInfo};
use simpipe_html::WebpageCreator;

use crate::args::{Mode, PipelineArgs};
use crate::dispatch::{self, DispatchReport, ScriptArguments, ScriptJob};
use crate::engine::{FigureEngine, RunMetadataLoader};
use crate::identity::{resolve_run_names, ResolvedRun};
use crate::reconcile;
use crate::store;

/// Aggregate outcome of one pipeline invocation.
#[derive(Debug)]
pub struct PipelineSummary {
    pub mode: Mode,
    pub run_names: Vec<String>,
    /// Metadata file per run: written (single-run) or expected (comparison).
    pub metadata_paths: Vec<PathBuf>,
    pub scripts: DispatchReport,
    /// Figures skipped during comparison reconciliation.
    pub skipped_figures: Vec<String>,
    /// Offending output filenames with occurrence counts.
    pub duplicate_filenames: Vec<(String, usize)>,
    pub webpage: Option<PathBuf>,
}

/// Top-level control. Picks the terminal path once from the run count, then
/// sequences resolver, metadata store, dispatcher and (in comparison mode)
/// reconciler before handing the merged plot set to page assembly.
pub fn run_pipeline(
    args: &PipelineArgs,
    config: &Config,
    loader: &dyn RunMetadataLoader,
    engine: &dyn FigureEngine,
) -> Result<PipelineSummary> {
    // Configuration errors abort before any filesystem work.
    args.validate()?;
    let mode = args.mode();
    let resolved = resolve_run_names(args, loader)?;
    ensure_dir(&args.output_directory)?;

    let summary = match mode {
        Mode::SingleRun => single_run(args, config, engine, &resolved)?,
        Mode::Comparison => comparison(args, config, engine, &resolved)?,
    };

    report_statistics(&summary);
    Ok(summary)
}

fn single_run(
    args: &PipelineArgs,
    config: &Config,
    engine: &dyn FigureEngine,
    resolved: &[ResolvedRun],
) -> Result<PipelineSummary> {
    let directory = &args.input_directories[0];
    let catalogue = &args.catalogues[0];
    let snapshot = &args.snapshots[0];
    let run = &resolved[0];

    let plots = engine
        .compute_figures(
            directory,
            catalogue,
            snapshot,
            &args.output_directory,
            !args.no_plots,
        )
        .context("figure computation failed")?;

    let record = MetadataRecord {
        run: RunInfo {
            name: run.name.clone(),
            redshift: run.redshift,
            snapshot: snapshot.clone(),
            catalogue: catalogue.clone(),
        },
        plots,
    };

    // One write attempt; absence of the record is not fatal to the figures
    // that already exist on disk.
    let metadata_path = store::metadata_path(
        directory,
        &args.metadata_base,
        snapshot,
        args.special_mode.as_deref(),
    )?;
    if let Err(err) = store::write_record(&metadata_path, &record) {
        warn!(path = %metadata_path.display(), %err, "could not persist metadata record");
    }

    if args.no_plots {
        return Ok(PipelineSummary {
            mode: Mode::SingleRun,
            run_names: vec![run.name.clone()],
            metadata_paths: vec![metadata_path],
            scripts: DispatchReport::empty(),
            skipped_figures: Vec::new(),
            duplicate_filenames: Vec::new(),
            webpage: None,
        });
    }

    let scripts: Vec<&simpipe_core::ScriptConfig> = config.scripts.iter().collect();
    let report = dispatch_scripts(args, config, resolved, &scripts)?;

    let duplicates = check_duplicates(
        record.plots.iter().map(|plot| plot.filename.as_str()),
        &scripts,
        !args.fast,
    );

    let mut creator = WebpageCreator::new(&run.name, &config.figure_format);
    creator.add_run(config, &run.name, run.redshift);
    creator.add_custom_css(config);
    creator.add_plots(&record.plots);
    if !args.fast {
        creator.add_scripts(scripts.iter().copied());
    }
    let webpage = creator.save(&args.output_directory)?;

    Ok(PipelineSummary {
        mode: Mode::SingleRun,
        run_names: vec![run.name.clone()],
        metadata_paths: vec![metadata_path],
        scripts: report,
        skipped_figures: Vec::new(),
        duplicate_filenames: duplicates,
        webpage: Some(webpage),
    })
}

fn comparison(
    args: &PipelineArgs,
    config: &Config,
    engine: &dyn FigureEngine,
    resolved: &[ResolvedRun],
) -> Result<PipelineSummary> {
    let mut metadata_paths = Vec::with_capacity(args.run_count());
    for (directory, snapshot) in args.input_directories.iter().zip(&args.snapshots) {
        metadata_paths.push(store::metadata_path(
            directory,
            &args.metadata_base,
            snapshot,
            args.special_mode.as_deref(),
        )?);
    }

    let mut records = store::read_records(&metadata_paths);
    // Legends use the reconciled names, not whatever was persisted.
    for (record, run) in records.iter_mut().zip(resolved) {
        if let Some(record) = record {
            record.run.name = run.name.clone();
        }
    }

    let merged = reconcile::merge_records(&records);
    // Duplicate detection covers the whole merged set; a figure whose
    // recreation later fails still claims its output filename.
    let merged_names: Vec<String> = merged
        .iter()
        .map(|entry| entry.plot.filename.clone())
        .collect();
    let outcome = reconcile::recreate_figures(merged, engine, &args.output_directory);

    let scripts = config.comparison_scripts();
    let report = dispatch_scripts(args, config, resolved, &scripts)?;

    let duplicates = check_duplicates(
        merged_names.iter().map(|name| name.as_str()),
        &scripts,
        !args.fast,
    );

    let page_name = resolved
        .iter()
        .map(|run| run.name.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    let mut creator = WebpageCreator::new(&page_name, &config.figure_format);
    for run in resolved {
        creator.add_run(config, &run.name, run.redshift);
    }
    creator.add_custom_css(config);
    creator.add_plots(&outcome.plots);
    if !args.fast {
        creator.add_scripts(scripts.iter().copied());
    }
    let webpage = creator.save(&args.output_directory)?;

    Ok(PipelineSummary {
        mode: Mode::Comparison,
        run_names: resolved.iter().map(|run| run.name.clone()).collect(),
        metadata_paths,
        scripts: report,
        skipped_figures: outcome.skipped,
        duplicate_filenames: duplicates,
        webpage: Some(webpage),
    })
}

fn dispatch_scripts(
    args: &PipelineArgs,
    config: &Config,
    resolved: &[ResolvedRun],
    scripts: &[&simpipe_core::ScriptConfig],
) -> Result<DispatchReport> {
    if args.fast || scripts.is_empty() {
        return Ok(DispatchReport::empty());
    }
    let jobs: Vec<ScriptJob> = scripts
        .iter()
        .map(|script| ScriptJob::from_config(script, &config.config_directory))
        .collect();
    let arguments = ScriptArguments {
        snapshots: args.snapshots.clone(),
        catalogues: args.catalogues.clone(),
        input_directories: args.input_directories.clone(),
        run_names: resolved.iter().map(|run| run.name.clone()).collect(),
        output_directory: args.output_directory.clone(),
        config_directory: args.config_directory.clone(),
    };
    let workers = args.jobs.unwrap_or_else(num_cpus::get);
    info!(jobs = jobs.len(), workers, "dispatching figure scripts");
    dispatch::run_scripts(&jobs, &arguments, workers)
}

/// Post-hoc overwrite-hazard check over the full merged plot set (directly
/// computed figures plus, when they ran, the script outputs).
fn check_duplicates<'a>(
    plot_names: impl Iterator<Item = &'a str>,
    scripts: &[&'a simpipe_core::ScriptConfig],
    scripts_ran: bool,
) -> Vec<(String, usize)> {
    let duplicates = if scripts_ran {
        reconcile::duplicate_filenames(
            plot_names.chain(scripts.iter().map(|script| script.output_file.as_str())),
        )
    } else {
        reconcile::duplicate_filenames(plot_names)
    };
    for (filename, count) in &duplicates {
        warn!(
            filename = filename.as_str(),
            count = *count,
            "duplicate output filename; later writers overwrite earlier ones"
        );
    }
    duplicates
}

fn report_statistics(summary: &PipelineSummary) {
    for result in &summary.scripts.results {
        match &result.failure {
            None => info!(
                script = result.script_name.as_str(),
                seconds = result.elapsed_seconds,
                "script finished"
            ),
            Some(reason) => warn!(
                script = result.script_name.as_str(),
                reason = reason.as_str(),
                "script failed"
            ),
        }
    }
    if !summary.scripts.results.is_empty() {
        info!(
            total_script_seconds = summary.scripts.total_script_seconds(),
            wall_seconds = summary.scripts.wall_seconds,
            "script dispatch complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;
    use crate::engine::RunMetadata;
    use simpipe_core::{LineSeries, PlotDefinition};

    struct FixedLoader;

    impl RunMetadataLoader for FixedLoader {
        fn load(
            &self,
            input_directory: &Path,
            _catalogue: &str,
            _snapshot: &str,
        ) -> Result<RunMetadata> {
            let name = input_directory
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string();
            Ok(RunMetadata {
                name,
                redshift: 0.1,
            })
        }
    }

    /// Engine that fabricates one plot per run and records recreate calls.
    struct FakeEngine {
        recreated: Mutex<Vec<String>>,
        fail_recreate: bool,
    }

    impl FakeEngine {
        fn new() -> FakeEngine {
            FakeEngine {
                recreated: Mutex::new(Vec::new()),
                fail_recreate: false,
            }
        }

        fn failing_recreate() -> FakeEngine {
            FakeEngine {
                fail_recreate: true,
                ..FakeEngine::new()
            }
        }
    }

    impl FigureEngine for FakeEngine {
        fn compute_figures(
            &self,
            _input_directory: &Path,
            _catalogue: &str,
            snapshot: &str,
            output_directory: &Path,
            render: bool,
        ) -> Result<Vec<PlotDefinition>> {
            let plot = PlotDefinition {
                filename: "stellar_mass_function".to_string(),
                title: "GSMF".to_string(),
                caption: String::new(),
                section: "Galaxies".to_string(),
                tag: "autoplotter".to_string(),
                lines: vec![LineSeries {
                    label: Some(snapshot.to_string()),
                    x: vec![1.0],
                    y: vec![2.0],
                }],
            };
            if render {
                fs::write(output_directory.join("stellar_mass_function.png"), b"png")?;
            }
            Ok(vec![plot])
        }

        fn recreate_figure(
            &self,
            plot: &PlotDefinition,
            runs: &[(String, Vec<LineSeries>)],
            _output_directory: &Path,
        ) -> Result<()> {
            if runs.is_empty() {
                return Err(anyhow!("no line data"));
            }
            if self.fail_recreate {
                return Err(anyhow!("cannot redraw {}", plot.filename));
            }
            self.recreated.lock().unwrap().push(plot.filename.clone());
            Ok(())
        }
    }

    fn base_args(dir: &Path, runs: usize) -> PipelineArgs {
        let input_directories: Vec<_> = (0..runs)
            .map(|i| {
                let d = dir.join(format!("run{i}"));
                fs::create_dir_all(&d).unwrap();
                d
            })
            .collect();
        PipelineArgs {
            config_directory: dir.join("config"),
            catalogues: (0..runs).map(|i| format!("halo_{i:04}.properties")).collect(),
            snapshots: (0..runs).map(|i| format!("snap_{i:04}.hdf5")).collect(),
            input_directories,
            output_directory: dir.join("out"),
            run_names: None,
            metadata_base: "data".to_string(),
            jobs: Some(1),
            special_mode: None,
            fast: true,
            no_plots: false,
            debug: false,
        }
    }

    fn empty_config(dir: &Path) -> Config {
        let config_dir = dir.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.yml"), "scripts: []\n").unwrap();
        Config::load(&config_dir).expect("config")
    }

    #[test]
    fn single_run_writes_exactly_one_record_at_the_documented_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = empty_config(dir.path());
        let mut args = base_args(dir.path(), 1);
        args.snapshots[0] = "snap_0007.hdf5".to_string();
        args.catalogues[0] = "halo_0007.properties".to_string();

        let summary =
            run_pipeline(&args, &config, &FixedLoader, &FakeEngine::new()).expect("pipeline");

        assert_eq!(summary.mode, Mode::SingleRun);
        let expected = args.input_directories[0].join("data_0007.yml");
        assert_eq!(summary.metadata_paths, vec![expected.clone()]);
        assert!(expected.exists(), "metadata record written");
        assert!(summary.webpage.as_ref().unwrap().exists());

        let yml_count = fs::read_dir(&args.input_directories[0])
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "yml"))
            .count();
        assert_eq!(yml_count, 1, "exactly one metadata file per run");
    }

    #[test]
    fn special_mode_suffixes_the_metadata_filename() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = empty_config(dir.path());
        let mut args = base_args(dir.path(), 1);
        args.special_mode = Some("dark_matter".to_string());

        let summary =
            run_pipeline(&args, &config, &FixedLoader, &FakeEngine::new()).expect("pipeline");
        assert!(summary.metadata_paths[0]
            .to_string_lossy()
            .ends_with("data_0000_dark_matter.yml"));
        assert!(summary.metadata_paths[0].exists());
    }

    #[test]
    fn no_plots_produces_metadata_only() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = empty_config(dir.path());
        let mut args = base_args(dir.path(), 1);
        args.no_plots = true;

        let summary =
            run_pipeline(&args, &config, &FixedLoader, &FakeEngine::new()).expect("pipeline");
        assert!(summary.webpage.is_none());
        assert!(summary.metadata_paths[0].exists());
        assert!(
            !args.output_directory.join("stellar_mass_function.png").exists(),
            "no figures rendered in no-plots mode"
        );
    }

    #[test]
    fn unwritable_metadata_directory_is_not_fatal() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = empty_config(dir.path());
        let mut args = base_args(dir.path(), 1);
        // Point the metadata write somewhere that cannot exist as a directory.
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"file, not dir").unwrap();
        args.input_directories[0] = blocker.join("nested");

        let summary =
            run_pipeline(&args, &config, &FixedLoader, &FakeEngine::new()).expect("pipeline");
        assert!(!summary.metadata_paths[0].exists());
        assert!(summary.webpage.as_ref().unwrap().exists(), "page still produced");
    }

    #[test]
    fn comparison_with_missing_records_still_builds_a_page() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = empty_config(dir.path());
        let engine = FakeEngine::new();

        // Produce a metadata record for run 0 only.
        let single = base_args(dir.path(), 1);
        run_pipeline(&single, &config, &FixedLoader, &engine).expect("single run");

        let mut both = base_args(dir.path(), 2);
        both.output_directory = dir.path().join("comparison");
        let summary = run_pipeline(&both, &config, &FixedLoader, &engine).expect("comparison");

        assert_eq!(summary.mode, Mode::Comparison);
        assert!(summary.webpage.as_ref().unwrap().exists());
        assert_eq!(
            engine.recreated.lock().unwrap().as_slice(),
            ["stellar_mass_function".to_string()],
            "figures derive from the one record that was found"
        );
    }

    #[test]
    fn comparison_legends_use_reconciled_names() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = empty_config(dir.path());
        let engine = FakeEngine::new();

        for i in 0..2 {
            let mut single = base_args(dir.path(), 1);
            single.input_directories = vec![dir.path().join(format!("run{i}"))];
            single.snapshots = vec![format!("snap_{i:04}.hdf5")];
            single.catalogues = vec![format!("halo_{i:04}.properties")];
            run_pipeline(&single, &config, &FixedLoader, &engine).expect("single run");
        }

        let mut both = base_args(dir.path(), 2);
        both.run_names = Some(vec!["Explicit A".to_string(), "Explicit B".to_string()]);
        both.output_directory = dir.path().join("comparison");
        let summary = run_pipeline(&both, &config, &FixedLoader, &engine).expect("comparison");
        assert_eq!(summary.run_names, vec!["Explicit A", "Explicit B"]);

        let html = fs::read_to_string(summary.webpage.unwrap()).unwrap();
        assert!(html.contains("Explicit A"));
        assert!(html.contains("Explicit B"));
    }

    #[test]
    fn unreadable_description_template_still_produces_a_page() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("config.yml"),
            "description_template: missing.html\nscripts: []\n",
        )
        .unwrap();
        let config = Config::load(&config_dir).expect("config");
        let args = base_args(dir.path(), 1);

        let summary =
            run_pipeline(&args, &config, &FixedLoader, &FakeEngine::new()).expect("pipeline");
        assert!(summary.webpage.as_ref().unwrap().exists());
        assert!(summary.metadata_paths[0].exists());
    }

    #[test]
    fn skipped_figures_still_count_toward_duplicate_detection() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        // A script claims the same output filename as the computed figure.
        fs::write(
            config_dir.join("config.yml"),
            "scripts:\n  - filename: scripts/dup.sh\n    output_file: stellar_mass_function\n    section: Galaxies\n    title: GSMF\n",
        )
        .unwrap();
        let config = Config::load(&config_dir).expect("config");

        for i in 0..2 {
            let mut single = base_args(dir.path(), 1);
            single.input_directories = vec![dir.path().join(format!("run{i}"))];
            single.snapshots = vec![format!("snap_{i:04}.hdf5")];
            single.catalogues = vec![format!("halo_{i:04}.properties")];
            run_pipeline(&single, &config, &FixedLoader, &FakeEngine::new()).expect("single run");
        }

        let mut both = base_args(dir.path(), 2);
        both.fast = false;
        both.output_directory = dir.path().join("comparison");
        let summary = run_pipeline(&both, &config, &FixedLoader, &FakeEngine::failing_recreate())
            .expect("comparison");

        assert_eq!(
            summary.skipped_figures,
            vec!["stellar_mass_function".to_string()]
        );
        assert_eq!(
            summary.duplicate_filenames,
            vec![("stellar_mass_function".to_string(), 2)],
            "a skipped figure still claims its output filename"
        );
    }

    #[test]
    fn config_errors_abort_before_any_io() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = empty_config(dir.path());
        let mut args = base_args(dir.path(), 1);
        args.no_plots = true;
        args.fast = false;
        args.output_directory = dir.path().join("never_created");

        let err = run_pipeline(&args, &config, &FixedLoader, &FakeEngine::new())
            .expect_err("must be rejected");
        assert!(err.to_string().contains("--no-plots requires --fast"));
        assert!(!args.output_directory.exists(), "no I/O before validation");
    }
}
